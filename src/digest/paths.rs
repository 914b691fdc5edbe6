use anyhow::Result;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct QqsumPaths {
    pub qqsum_home: PathBuf,
    pub image_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub config_file: PathBuf,
}

impl QqsumPaths {
    /// Per-group image cache, `<image_dir>/group_<id>`.
    pub fn group_image_dir(&self, group_id: i64) -> PathBuf {
        self.image_dir.join(format!("group_{group_id}"))
    }
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn resolve_paths() -> Result<QqsumPaths> {
    let qqsum_home = match env::var("QQSUM_HOME") {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => required_home_dir()?.join(".qqsum"),
    };

    let image_dir = env_or_default_path("QQSUM_IMAGE_DIR", qqsum_home.join("images"));
    let logs_dir = env_or_default_path("QQSUM_LOGS_DIR", qqsum_home.join("logs"));
    let config_file = env_or_default_path("QQSUM_CONFIG_PATH", qqsum_home.join("qqsum.toml"));

    Ok(QqsumPaths {
        qqsum_home,
        image_dir,
        logs_dir,
        config_file,
    })
}
