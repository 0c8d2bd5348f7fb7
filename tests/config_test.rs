#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use std::env;
    use std::fs;
    use tempfile::tempdir;
    use vdkdemux::config::{create_default_config_template, IndexMode, OggIndexMode};
    use vdkdemux::{DemuxConfig, DemuxError, Result};

    #[test]
    fn test_template_matches_defaults() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("vdkdemux.toml");
        create_default_config_template(&path)?;
        assert_eq!(DemuxConfig::from_file(&path)?, DemuxConfig::default());

        // an existing file is left alone
        fs::write(&path, "probe_size = 4096\n")?;
        create_default_config_template(&path)?;
        assert_eq!(DemuxConfig::from_file(&path)?.probe_size, 4096);
        Ok(())
    }

    #[test]
    fn test_full_document() -> Result<()> {
        let config = DemuxConfig::from_toml_str(
            r#"
            probe_size = 8192

            [index]
            mode = "force"
            file_save = "/tmp/movie.idx"

            [avi]
            force_non_interleaved = true
            pts_from_bps = false

            [ogg]
            index = "duration-only"
            seek_tolerance = 0.25

            [queue]
            max_packets = 64
            "#,
        )?;
        assert_eq!(config.probe_size, 8192);
        assert_eq!(config.index.mode, IndexMode::Force);
        assert_eq!(config.index.file_save.as_deref(), Some(std::path::Path::new("/tmp/movie.idx")));
        assert!(config.index.file_load.is_none());
        assert!(config.avi.force_non_interleaved);
        assert!(!config.avi.pts_from_bps);
        assert_eq!(config.ogg.index, OggIndexMode::DurationOnly);
        assert_eq!(config.ogg.seek_refinements, 3);
        assert_eq!(config.ogg.seek_tolerance, 0.25);
        assert_eq!(config.queue.max_packets, 64);
        assert_eq!(config.queue.max_bytes, 16 * 1024 * 1024);
        Ok(())
    }

    #[test]
    fn test_invalid_documents_are_rejected() {
        for doc in [
            "probe_size = 4",
            "[queue]\nmax_packets = 0",
            "[ogg]\nseek_tolerance = -1.0",
            "[index]\nmode = \"sometimes\"",
            "probe_size = \"big\"",
        ] {
            let err = DemuxConfig::from_toml_str(doc).unwrap_err();
            assert!(
                matches!(err, DemuxError::Config(_) | DemuxError::Toml(_)),
                "{:?} gave {:?}",
                doc,
                err
            );
        }
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        let err = DemuxConfig::from_file(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, DemuxError::Io(_)));
    }

    // variables are process-wide, keep every case in this one test
    #[test]
    fn test_environment_overrides() -> Result<()> {
        env::set_var("VDKDEMUX_INDEX_MODE", "2");
        env::set_var("VDKDEMUX_PROBE_SIZE", " 4096 ");
        env::set_var("VDKDEMUX_FORCE_NI", "yes");
        let config = DemuxConfig::from_env()?;
        assert_eq!(config.index.mode, IndexMode::Force);
        assert_eq!(config.probe_size, 4096);
        assert!(config.avi.force_non_interleaved);

        env::set_var("VDKDEMUX_INDEX_MODE", "Ignore");
        env::set_var("VDKDEMUX_FORCE_NI", "0");
        let config = DemuxConfig::from_env()?;
        assert_eq!(config.index.mode, IndexMode::Ignore);
        assert!(!config.avi.force_non_interleaved);

        env::set_var("VDKDEMUX_PROBE_SIZE", "lots");
        assert!(matches!(DemuxConfig::from_env(), Err(DemuxError::Config(_))));

        env::remove_var("VDKDEMUX_INDEX_MODE");
        env::remove_var("VDKDEMUX_PROBE_SIZE");
        env::remove_var("VDKDEMUX_FORCE_NI");
        assert_eq!(DemuxConfig::from_env()?, DemuxConfig::default());
        Ok(())
    }
}
