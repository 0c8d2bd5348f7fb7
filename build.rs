use std::env;
use std::fs;
use std::path::Path;

fn main() {
    // The config template is embedded by `config::create_default_config_template`
    let out_dir = env::var("OUT_DIR").unwrap_or_else(|_| "./".to_string());
    let template_path = Path::new(&out_dir).join("config.template.toml");

    let template = r#"# vdkdemux configuration template
# Copy this file to 'vdkdemux.toml' and adjust the values you need.

# Bytes peeked by format probes
probe_size = 2048

[index]
# ignore | auto | build | force
mode = "auto"
# file_load = "movie.idx"
# file_save = "movie.idx"

[avi]
force_non_interleaved = false
pts_from_bps = true

[ogg]
# lazy | full | duration-only
index = "lazy"
seek_refinements = 3
seek_tolerance = 0.5

[queue]
max_packets = 4096
max_bytes = 16777216
"#;

    let _ = fs::write(template_path, template);
    println!("cargo:rerun-if-changed=build.rs");
}
