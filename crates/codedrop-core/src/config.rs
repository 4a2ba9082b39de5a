use std::path::PathBuf;
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::code_store::CodeSpace;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Directory holding the persisted users, inbox and friends records
    pub data_dir: PathBuf,

    /// Port the service listens on
    pub listen_port: u16,

    /// Base of the download link handed to the QR renderer
    pub public_base_url: String,

    /// Lifetime of an anonymous code transfer (10 minutes)
    pub code_ttl_secs: u64,

    /// Lifetime of an inbox delivery (2 days)
    pub inbox_ttl_secs: u64,

    /// Range codes and inbox ids are drawn from
    pub code_space: CodeSpace,

    /// Draws attempted before giving up on finding a free code
    pub max_code_attempts: u32,

    /// Maximum number of search hits returned
    pub search_limit: usize,

    /// Shortest accepted search query, in characters
    pub min_query_len: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(".codedrop"),
            listen_port: 7878,
            public_base_url: "http://localhost:7878".to_string(),
            code_ttl_secs: 600,
            inbox_ttl_secs: 2 * 24 * 60 * 60,
            code_space: CodeSpace::default(),
            max_code_attempts: 64,
            search_limit: 10,
            min_query_len: 2,
        }
    }
}

impl ServiceConfig {
    pub fn with_data_dir(mut self, data_dir: PathBuf) -> Self {
        self.data_dir = data_dir;
        self
    }

    pub fn code_ttl(&self) -> Duration {
        Duration::from_secs(self.code_ttl_secs)
    }

    pub fn inbox_ttl(&self) -> Duration {
        Duration::from_secs(self.inbox_ttl_secs)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.code_space.min > self.code_space.max {
            anyhow::bail!(
                "Invalid code space: {} > {}",
                self.code_space.min,
                self.code_space.max
            );
        }
        if self.max_code_attempts == 0 {
            anyhow::bail!("max_code_attempts must be at least 1");
        }
        if self.code_ttl_secs == 0 || self.inbox_ttl_secs == 0 {
            anyhow::bail!("TTLs must be at least one second");
        }
        Ok(())
    }

    pub fn ensure_data_dir(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = ServiceConfig::default();
        assert_eq!(cfg.code_ttl(), Duration::from_secs(600));
        assert_eq!(cfg.inbox_ttl(), Duration::from_secs(172_800));
        assert_eq!(cfg.code_space.size(), 900_000);
        assert_eq!(cfg.search_limit, 10);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() -> anyhow::Result<()> {
        let cfg: ServiceConfig = serde_json::from_str(r#"{"listen_port": 9000}"#)?;
        assert_eq!(cfg.listen_port, 9000);
        assert_eq!(cfg.code_ttl_secs, 600);
        Ok(())
    }

    #[test]
    fn test_rejects_inverted_code_space() {
        let mut cfg = ServiceConfig::default();
        cfg.code_space = CodeSpace { min: 10, max: 9 };
        assert!(cfg.validate().is_err());
    }
}
