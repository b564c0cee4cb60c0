//! Google Cloud Vision `images:annotate` transport.

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::vision::{TransportError, VisionTransport};
use crate::domain::{
    AnalysisResult, BoundingBox, DetectedObject, Label, Likelihood, SafeSearch,
};
use crate::models::ImageAsset;

/// Requested together so one round trip covers every signal.
const FEATURES: [&str; 4] = [
    "SAFE_SEARCH_DETECTION",
    "LABEL_DETECTION",
    "FACE_DETECTION",
    "OBJECT_LOCALIZATION",
];
const MAX_RESULTS: u32 = 50;

#[derive(Debug, Serialize)]
struct AnnotateRequest<'a> {
    requests: [AnnotateImageRequest<'a>; 1],
}

#[derive(Debug, Serialize)]
struct AnnotateImageRequest<'a> {
    image: ImageContent,
    features: Vec<Feature<'a>>,
}

#[derive(Debug, Serialize)]
struct ImageContent {
    content: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Feature<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    max_results: u32,
}

impl AnnotateRequest<'static> {
    fn for_image(image: &ImageAsset) -> Self {
        let content = base64::engine::general_purpose::STANDARD.encode(image.bytes());
        let features = FEATURES
            .iter()
            .map(|&kind| Feature {
                kind,
                max_results: MAX_RESULTS,
            })
            .collect();
        Self {
            requests: [AnnotateImageRequest {
                image: ImageContent { content },
                features,
            }],
        }
    }
}

#[derive(Debug, Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<AnnotateImageResponse>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct AnnotateImageResponse {
    safe_search_annotation: Option<SafeSearchAnnotation>,
    label_annotations: Vec<EntityAnnotation>,
    face_annotations: Vec<FaceAnnotation>,
    localized_object_annotations: Vec<LocalizedObjectAnnotation>,
    error: Option<RpcStatus>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SafeSearchAnnotation {
    adult: Option<String>,
    spoof: Option<String>,
    medical: Option<String>,
    violence: Option<String>,
    racy: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EntityAnnotation {
    description: String,
    score: f32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct FaceAnnotation {
    bounding_poly: BoundingPoly,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct LocalizedObjectAnnotation {
    name: String,
    score: f32,
    bounding_poly: BoundingPoly,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct BoundingPoly {
    vertices: Vec<Vertex>,
    normalized_vertices: Vec<Vertex>,
}

// Zero coordinates are omitted on the wire.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Vertex {
    x: f32,
    y: f32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RpcStatus {
    code: i32,
    message: String,
}

fn likelihood(value: Option<&String>) -> Likelihood {
    value
        .map(|v| Likelihood::from_wire(v))
        .unwrap_or(Likelihood::Possible)
}

impl BoundingPoly {
    fn to_box(&self) -> BoundingBox {
        let source = if self.vertices.is_empty() {
            &self.normalized_vertices
        } else {
            &self.vertices
        };
        let points: Vec<(f32, f32)> = source.iter().map(|v| (v.x, v.y)).collect();
        BoundingBox::from_vertices(&points).unwrap_or_default()
    }
}

impl AnnotateImageResponse {
    fn into_analysis(self) -> Result<AnalysisResult, TransportError> {
        if let Some(status) = self.error {
            return Err(TransportError::Service {
                code: status.code,
                message: status.message,
            });
        }

        // A missing annotation means the image went unscored, not that it is clean.
        let annotation = self.safe_search_annotation.unwrap_or_default();
        let safe_search = SafeSearch {
            adult: likelihood(annotation.adult.as_ref()),
            violence: likelihood(annotation.violence.as_ref()),
            racy: likelihood(annotation.racy.as_ref()),
            medical: likelihood(annotation.medical.as_ref()),
            spoof: likelihood(annotation.spoof.as_ref()),
        };

        Ok(AnalysisResult {
            safe_search,
            labels: self
                .label_annotations
                .into_iter()
                .map(|l| Label {
                    name: l.description,
                    confidence: l.score,
                })
                .collect(),
            faces: self
                .face_annotations
                .iter()
                .map(|f| f.bounding_poly.to_box())
                .collect(),
            objects: self
                .localized_object_annotations
                .into_iter()
                .map(|o| DetectedObject {
                    bounding_box: o.bounding_poly.to_box(),
                    name: o.name,
                    confidence: o.score,
                })
                .collect(),
        })
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_decode() {
            TransportError::Decode(e.to_string())
        } else {
            TransportError::Network(e.to_string())
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpVisionTransport {
    http: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpVisionTransport {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            api_key,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl VisionTransport for HttpVisionTransport {
    async fn annotate(&self, image: &ImageAsset) -> Result<AnalysisResult, TransportError> {
        let body = AnnotateRequest::for_image(image);

        let mut request = self.http.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.query(&[("key", key)]);
        }

        let resp = request.send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Status { status, body });
        }

        let parsed: AnnotateResponse = resp
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;

        parsed
            .responses
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::Decode("empty responses array".into()))?
            .into_analysis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures;
    use axum::{
        Json, Router,
        extract::{Query, State},
        http::StatusCode,
        routing::post,
    };
    use serde_json::{Value, json};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Seen {
        body: Arc<Mutex<Option<Value>>>,
        key: Arc<Mutex<Option<String>>>,
    }

    async fn spawn_vision(status: StatusCode, reply: Value) -> (String, Seen) {
        let seen = Seen::default();
        let app = Router::new()
            .route(
                "/v1/annotate",
                post(
                    move |State(seen): State<Seen>,
                          Query(query): Query<HashMap<String, String>>,
                          Json(body): Json<Value>| {
                        let reply = reply.clone();
                        async move {
                            *seen.body.lock().unwrap() = Some(body);
                            *seen.key.lock().unwrap() = query.get("key").cloned();
                            (status, Json(reply))
                        }
                    },
                ),
            )
            .with_state(seen.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/v1/annotate", addr), seen)
    }

    fn transport(endpoint: String) -> HttpVisionTransport {
        HttpVisionTransport::new(endpoint, Some("test-key".into()), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_sends_one_request_with_all_features() {
        let (endpoint, seen) = spawn_vision(StatusCode::OK, json!({ "responses": [{}] })).await;
        let bytes = fixtures::png(4, 4, [1, 2, 3]);
        let asset = ImageAsset::from_bytes(bytes.clone());

        transport(endpoint).annotate(&asset).await.unwrap();

        let body = seen.body.lock().unwrap().clone().unwrap();
        let request = &body["requests"][0];
        let kinds: Vec<&str> = request["features"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["type"].as_str().unwrap())
            .collect();
        assert_eq!(kinds, FEATURES.to_vec());

        let content = request["image"]["content"].as_str().unwrap();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(content)
            .unwrap();
        assert_eq!(decoded, bytes);
        assert_eq!(seen.key.lock().unwrap().as_deref(), Some("test-key"));
    }

    #[tokio::test]
    async fn test_parses_annotations() {
        let reply = json!({
            "responses": [{
                "safeSearchAnnotation": {
                    "adult": "VERY_UNLIKELY",
                    "spoof": "UNLIKELY",
                    "medical": "LIKELY",
                    "violence": "VERY_UNLIKELY",
                    "racy": "POSSIBLE"
                },
                "labelAnnotations": [
                    { "description": "Kitchen", "score": 0.97 },
                    { "description": "Handgun", "score": 0.9 }
                ],
                "faceAnnotations": [{
                    "boundingPoly": { "vertices": [
                        { "x": 10, "y": 20 }, { "x": 50, "y": 20 },
                        { "x": 50, "y": 70 }, { "x": 10, "y": 70 }
                    ]}
                }],
                "localizedObjectAnnotations": [{
                    "name": "Couch",
                    "score": 0.8,
                    "boundingPoly": { "normalizedVertices": [
                        { "y": 0.5 }, { "x": 0.25, "y": 0.5 },
                        { "x": 0.25, "y": 1.0 }, { "y": 1.0 }
                    ]}
                }]
            }]
        });
        let (endpoint, _) = spawn_vision(StatusCode::OK, reply).await;
        let asset = ImageAsset::from_bytes(fixtures::png(4, 4, [0, 0, 0]));

        let result = transport(endpoint).annotate(&asset).await.unwrap();

        assert_eq!(result.safe_search.medical, Likelihood::Likely);
        assert_eq!(result.safe_search.racy, Likelihood::Possible);
        assert_eq!(result.labels.len(), 2);
        assert_eq!(result.labels[1].name, "Handgun");
        assert_eq!(result.face_count(), 1);
        assert_eq!(result.faces[0].width, 40.0);
        assert_eq!(result.objects[0].name, "Couch");
        assert_eq!(result.objects[0].bounding_box.x, 0.0);
        assert_eq!(result.objects[0].bounding_box.height, 0.5);
    }

    #[tokio::test]
    async fn test_missing_safe_search_is_not_clean() {
        let (endpoint, _) = spawn_vision(StatusCode::OK, json!({ "responses": [{}] })).await;
        let asset = ImageAsset::from_bytes(fixtures::png(4, 4, [0, 0, 0]));

        let result = transport(endpoint).annotate(&asset).await.unwrap();
        assert_eq!(result.safe_search.adult, Likelihood::Possible);
    }

    #[tokio::test]
    async fn test_http_status_maps_to_transport_error() {
        let (endpoint, _) =
            spawn_vision(StatusCode::SERVICE_UNAVAILABLE, json!({ "error": "busy" })).await;
        let asset = ImageAsset::from_bytes(fixtures::png(4, 4, [0, 0, 0]));

        let err = transport(endpoint).annotate(&asset).await.unwrap_err();
        assert!(matches!(err, TransportError::Status { status: 503, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_per_image_error_maps_to_service_error() {
        let reply = json!({
            "responses": [{ "error": { "code": 7, "message": "permission denied" } }]
        });
        let (endpoint, _) = spawn_vision(StatusCode::OK, reply).await;
        let asset = ImageAsset::from_bytes(fixtures::png(4, 4, [0, 0, 0]));

        let err = transport(endpoint).annotate(&asset).await.unwrap_err();
        assert_eq!(
            err,
            TransportError::Service {
                code: 7,
                message: "permission denied".into()
            }
        );
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_empty_responses_is_decode_error() {
        let (endpoint, _) = spawn_vision(StatusCode::OK, json!({ "responses": [] })).await;
        let asset = ImageAsset::from_bytes(fixtures::png(4, 4, [0, 0, 0]));

        let err = transport(endpoint).annotate(&asset).await.unwrap_err();
        assert!(matches!(err, TransportError::Decode(_)));
    }
}
