use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct AppConfig {
    pub script_path: PathBuf,
    pub bind_addr: String,
    pub ws_allowed_origins: Option<Vec<String>>,
}

impl AppConfig {
    pub fn from_args(args: &[String]) -> Result<Self, String> {
        if args.len() < 2 {
            return Err("usage: quest <script-path> [bind_addr]".to_string());
        }

        let script_path = Path::new(&args[1]).to_path_buf();
        let bind_addr = if args.len() > 2 {
            args[2].clone()
        } else {
            std::env::var("QUEST_BIND_ADDR")
                .ok()
                .and_then(|value| {
                    let trimmed = value.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        Some(trimmed.to_string())
                    }
                })
                .unwrap_or_else(|| "0.0.0.0:8765".to_string())
        };
        let ws_allowed_origins = std::env::var("QUEST_WS_ORIGINS").ok().and_then(|value| {
            let entries: Vec<String> = value
                .split(',')
                .map(|entry| entry.trim())
                .filter(|entry| !entry.is_empty())
                .map(|entry| entry.to_string())
                .collect();
            if entries.is_empty() {
                None
            } else {
                Some(entries)
            }
        });

        Ok(Self {
            script_path,
            bind_addr,
            ws_allowed_origins,
        })
    }

    /// Directory the script lives in; logs go to `<root>/log`.
    pub fn root(&self) -> PathBuf {
        self.script_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}
