use async_trait::async_trait;
use common::error::QnaError;
use reqwest::{
    header::{HeaderMap, HeaderValue},
    Client,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::metadata::MetadataPair;

const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeBaseSummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct KnowledgeBaseList {
    #[serde(default)]
    knowledgebases: Vec<KnowledgeBaseSummary>,
}

/// One Q&A document as the knowledge-base service stores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QnaDocument {
    /// Server-assigned id; `0` when adding a new document.
    pub id: u64,
    pub answer: String,
    pub questions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub metadata: Vec<MetadataPair>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QnaDocumentList {
    #[serde(default)]
    qna_documents: Vec<QnaDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateKnowledgeBase {
    pub name: String,
    pub qna_list: Vec<QnaDocument>,
    pub urls: Vec<String>,
    pub files: Vec<String>,
}

impl CreateKnowledgeBase {
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            qna_list: Vec::new(),
            urls: Vec::new(),
            files: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QnaAddition {
    pub qna_list: Vec<QnaDocument>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QnaDeletion {
    pub ids: Vec<u64>,
}

/// Batch applied atomically by the service: additions and deletions land together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBasePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add: Option<QnaAddition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<QnaDeletion>,
}

impl KnowledgeBasePatch {
    pub fn replace(document: QnaDocument, old_ids: Vec<u64>) -> Self {
        Self {
            add: Some(QnaAddition {
                qna_list: vec![document],
            }),
            delete: Some(QnaDeletion { ids: old_ids }),
        }
    }

    pub fn delete(ids: Vec<u64>) -> Self {
        Self {
            add: None,
            delete: Some(QnaDeletion { ids }),
        }
    }
}

/// Network capability of the hosted knowledge-base service.
#[async_trait]
pub trait KnowledgeBaseClient: Send + Sync {
    async fn list_knowledgebases(&self) -> Result<Vec<KnowledgeBaseSummary>, QnaError>;

    async fn create_knowledgebase(&self, request: &CreateKnowledgeBase) -> Result<(), QnaError>;

    async fn update_knowledgebase(
        &self,
        knowledgebase_id: &str,
        patch: &KnowledgeBasePatch,
    ) -> Result<(), QnaError>;

    async fn list_documents(&self, knowledgebase_id: &str) -> Result<Vec<QnaDocument>, QnaError>;
}

/// `reqwest` client for the QnA Maker knowledge-base API.
pub struct QnaMakerClient {
    client: Client,
    base_url: String,
}

impl QnaMakerClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, QnaError> {
        let mut key = HeaderValue::from_str(api_key).map_err(|e| {
            QnaError::ProviderUnavailable(format!("invalid knowledge-base api key: {e}"))
        })?;
        key.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(SUBSCRIPTION_KEY_HEADER, key);

        let client = Client::builder().default_headers(headers).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl KnowledgeBaseClient for QnaMakerClient {
    async fn list_knowledgebases(&self) -> Result<Vec<KnowledgeBaseSummary>, QnaError> {
        let body: KnowledgeBaseList = self
            .client
            .get(self.url("/"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(body.knowledgebases)
    }

    async fn create_knowledgebase(&self, request: &CreateKnowledgeBase) -> Result<(), QnaError> {
        self.client
            .post(self.url("/create"))
            .json(request)
            .send()
            .await?
            .error_for_status()?;
        debug!(knowledgebase = %request.name, "Requested knowledge base creation");
        Ok(())
    }

    async fn update_knowledgebase(
        &self,
        knowledgebase_id: &str,
        patch: &KnowledgeBasePatch,
    ) -> Result<(), QnaError> {
        self.client
            .patch(self.url(&format!("/{knowledgebase_id}")))
            .json(patch)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn list_documents(&self, knowledgebase_id: &str) -> Result<Vec<QnaDocument>, QnaError> {
        let body: QnaDocumentList = self
            .client
            .get(self.url(&format!("/{knowledgebase_id}/test/qna/")))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(body.qna_documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::error::ErrorKind;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn lists_knowledgebases_with_subscription_key() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/"))
            .and(header(SUBSCRIPTION_KEY_HEADER, "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "knowledgebases": [
                    {"id": "kb-1", "name": "other"},
                    {"id": "kb-2", "name": "botpress"}
                ]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = QnaMakerClient::new(&mock_server.uri(), "secret").unwrap();
        let knowledgebases = client.list_knowledgebases().await.unwrap();

        assert_eq!(knowledgebases.len(), 2);
        assert_eq!(knowledgebases[1].id, "kb-2");
        assert_eq!(knowledgebases[1].name, "botpress");
    }

    #[tokio::test]
    async fn creates_empty_knowledgebase() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/create"))
            .and(body_json(json!({
                "name": "botpress",
                "qnaList": [],
                "urls": [],
                "files": []
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = QnaMakerClient::new(&mock_server.uri(), "secret").unwrap();
        client
            .create_knowledgebase(&CreateKnowledgeBase::empty("botpress"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn patch_sends_add_and_delete_in_one_batch() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PATCH"))
            .and(path("/kb-2"))
            .and(body_json(json!({
                "add": {"qnaList": [{
                    "id": 0,
                    "answer": "Fine",
                    "questions": ["How are you?"],
                    "source": "qna-provider",
                    "metadata": [{"name": "enabled", "value": true}]
                }]},
                "delete": {"ids": [7]}
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = QnaMakerClient::new(&mock_server.uri(), "secret").unwrap();
        let document = QnaDocument {
            id: 0,
            answer: "Fine".into(),
            questions: vec!["How are you?".into()],
            source: Some("qna-provider".into()),
            metadata: vec![MetadataPair::new("enabled", true)],
        };
        client
            .update_knowledgebase("kb-2", &KnowledgeBasePatch::replace(document, vec![7]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn lists_documents_of_knowledgebase() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/kb-2/test/qna/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "qnaDocuments": [{
                    "id": 3,
                    "answer": "Fine",
                    "questions": ["How are you?"],
                    "source": "Editorial",
                    "metadata": []
                }]
            })))
            .mount(&mock_server)
            .await;

        let client = QnaMakerClient::new(&mock_server.uri(), "secret").unwrap();
        let documents = client.list_documents("kb-2").await.unwrap();

        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].id, 3);
        assert_eq!(documents[0].source.as_deref(), Some("Editorial"));
    }

    #[tokio::test]
    async fn server_errors_surface_as_unavailable() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let client = QnaMakerClient::new(&mock_server.uri(), "secret").unwrap();
        let err = client.list_knowledgebases().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderUnavailable);
    }

    #[test]
    fn rejects_api_key_that_is_not_a_header_value() {
        let err = QnaMakerClient::new("http://localhost", "bad\nkey")
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::ProviderUnavailable);
    }
}
