use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    Memory,
}

/// Which record store keeps the canonical Q&A entries.
#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QnaBackend {
    Local,
    Remote,
}

fn default_storage_kind() -> StorageKind {
    StorageKind::Local
}

fn default_qna_backend() -> QnaBackend {
    QnaBackend::Local
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default = "default_qna_backend")]
    pub qna_backend: QnaBackend,
    #[serde(default = "default_storage_kind")]
    pub storage: StorageKind,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_qna_dir")]
    pub qna_dir: String,
    #[serde(default = "default_intents_dir")]
    pub intents_dir: String,
    #[serde(default)]
    pub qna_maker_api_key: Option<String>,
    #[serde(default = "default_qna_maker_base_url")]
    pub qna_maker_base_url: String,
    #[serde(default = "default_knowledgebase_name")]
    pub knowledgebase_name: String,
    #[serde(default = "default_intent_prefix")]
    pub intent_prefix: String,
    #[serde(default = "default_entry_source")]
    pub entry_source: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            qna_backend: default_qna_backend(),
            storage: default_storage_kind(),
            data_dir: default_data_dir(),
            qna_dir: default_qna_dir(),
            intents_dir: default_intents_dir(),
            qna_maker_api_key: None,
            qna_maker_base_url: default_qna_maker_base_url(),
            knowledgebase_name: default_knowledgebase_name(),
            intent_prefix: default_intent_prefix(),
            entry_source: default_entry_source(),
        }
    }
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_qna_dir() -> String {
    "qna".to_string()
}

fn default_intents_dir() -> String {
    "intents".to_string()
}

fn default_qna_maker_base_url() -> String {
    "https://westus.api.cognitive.microsoft.com/qnamaker/v4.0/knowledgebases".to_string()
}

fn default_knowledgebase_name() -> String {
    "botpress".to_string()
}

fn default_intent_prefix() -> String {
    "__qna__".to_string()
}

fn default_entry_source() -> String {
    "qna-provider".to_string()
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_missing_keys() {
        let config: AppConfig = Config::builder()
            .set_override("qna_dir", "faq")
            .expect("override")
            .build()
            .expect("build config")
            .try_deserialize()
            .expect("deserialize config");

        assert_eq!(config.qna_dir, "faq");
        assert_eq!(config.qna_backend, QnaBackend::Local);
        assert_eq!(config.storage, StorageKind::Local);
        assert_eq!(config.intent_prefix, "__qna__");
        assert_eq!(config.knowledgebase_name, "botpress");
        assert!(config.qna_maker_api_key.is_none());
    }

    #[test]
    fn backend_names_are_lowercase() {
        let config: AppConfig = Config::builder()
            .set_override("qna_backend", "remote")
            .expect("override")
            .set_override("storage", "memory")
            .expect("override")
            .set_override("qna_maker_api_key", "secret")
            .expect("override")
            .build()
            .expect("build config")
            .try_deserialize()
            .expect("deserialize config");

        assert_eq!(config.qna_backend, QnaBackend::Remote);
        assert_eq!(config.storage, StorageKind::Memory);
        assert_eq!(config.qna_maker_api_key.as_deref(), Some("secret"));
    }

    #[test]
    fn default_impl_matches_serde_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.data_dir, "./data");
        assert_eq!(config.intents_dir, "intents");
        assert_eq!(config.entry_source, "qna-provider");
    }
}
