use std::path::PathBuf;

// System locations used outside dev mode

pub fn system_config_file() -> PathBuf {
    PathBuf::from("/etc/fingergate/fingergate.toml")
}

pub fn local_config_file() -> PathBuf {
    PathBuf::from("configs/fingergate.toml")
}
