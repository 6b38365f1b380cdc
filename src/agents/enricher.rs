//! The enrich capability: classify an item, then embed its text.

use async_trait::async_trait;
use radio_cortex_core::models::{Capability, EmbeddingPatch, Item, ItemPatch};
use tracing::debug;

use super::{Agent, Outcome};
use crate::classify::{Classification, Classifier};
use crate::embedding::Embedder;

pub struct EnricherAgent {
    classifier: Box<dyn Classifier>,
    embedder: Box<dyn Embedder>,
}

impl EnricherAgent {
    pub fn new(classifier: Box<dyn Classifier>, embedder: Box<dyn Embedder>) -> Self {
        Self {
            classifier,
            embedder,
        }
    }
}

/// Text the vector is computed from: descriptive fields plus the
/// classification, blanks skipped.
pub fn embedding_text(item: &Item, classification: &Classification) -> String {
    let secondary = classification.secondary_categories.join(" ");
    let moods = classification.mood_tags.join(" ");
    let parts = [
        item.title.as_str(),
        item.artist.as_deref().unwrap_or("Unknown"),
        item.album.as_deref().unwrap_or(""),
        classification.category.as_str(),
        secondary.as_str(),
        moods.as_str(),
        classification.cultural_context.as_deref().unwrap_or(""),
    ];
    parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl Agent for EnricherAgent {
    fn capability(&self) -> Capability {
        Capability::Enrich
    }

    async fn process(&self, item: &Item) -> Outcome {
        let classification = match self.classifier.classify(item).await {
            Ok(c) => c,
            Err(e) => return e.into(),
        };
        debug!(
            item_id = %item.id,
            classifier = self.classifier.name(),
            category = %classification.category,
            "classified"
        );

        let text = embedding_text(item, &classification);
        let vector = match self.embedder.embed(&[text]).await {
            Ok(mut vecs) if vecs.len() == 1 => vecs.remove(0),
            Ok(vecs) => {
                return Outcome::Terminal(format!(
                    "embedder returned {} vectors for 1 input",
                    vecs.len()
                ))
            }
            Err(e) => return e.into(),
        };
        if vector.len() != self.embedder.dims() {
            return Outcome::Terminal(format!(
                "embedder '{}' returned {} dimensions, expected {}",
                self.embedder.model_name(),
                vector.len(),
                self.embedder.dims()
            ));
        }

        Outcome::Success(ItemPatch {
            category: Some(classification.category),
            secondary_categories: Some(classification.secondary_categories),
            mood_tags: Some(classification.mood_tags.into_iter().collect()),
            cultural_context: classification.cultural_context,
            embedding: Some(EmbeddingPatch {
                vector,
                model: self.embedder.model_name().to_string(),
            }),
            ..ItemPatch::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::KeywordClassifier;
    use crate::embedding::HashEmbedder;
    use radio_cortex_core::error::CollaboratorError;
    use radio_cortex_core::license::LicenseKind;
    use radio_cortex_core::models::NewItem;

    fn item(title: &str) -> Item {
        Item::from_new(
            "id-1".into(),
            NewItem {
                source: "test".into(),
                source_id: "1".into(),
                title: title.into(),
                artist: Some("Astrud Gilberto".into()),
                album: None,
                duration_secs: Some(180),
                license_raw: None,
                license_kind: LicenseKind::CcBy,
                source_url: "https://example.org/1".into(),
                media_url: None,
                collected_by: "test".into(),
            },
            0,
        )
    }

    struct FailingClassifier(CollaboratorError);

    #[async_trait]
    impl Classifier for FailingClassifier {
        fn name(&self) -> &str {
            "failing"
        }

        async fn classify(&self, _item: &Item) -> Result<Classification, CollaboratorError> {
            Err(self.0.clone())
        }
    }

    struct ShortEmbedder;

    #[async_trait]
    impl Embedder for ShortEmbedder {
        fn model_name(&self) -> &str {
            "short"
        }

        fn dims(&self) -> usize {
            8
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CollaboratorError> {
            Ok(texts.iter().map(|_| vec![1.0; 3]).collect())
        }
    }

    #[test]
    fn test_embedding_text_skips_blanks() {
        let classification = Classification {
            category: "Jazz".into(),
            secondary_categories: vec!["MPB".into()],
            mood_tags: vec!["calm".into(), "romantic".into()],
            cultural_context: None,
        };
        assert_eq!(
            embedding_text(&item("Bossa Nova Night"), &classification),
            "Bossa Nova Night Astrud Gilberto Jazz MPB calm romantic"
        );
    }

    #[tokio::test]
    async fn test_success_carries_classification_and_vector() {
        let agent =
            EnricherAgent::new(Box::new(KeywordClassifier), Box::new(HashEmbedder::new(32)));
        match agent.process(&item("Bossa Nova Night")).await {
            Outcome::Success(patch) => {
                assert_eq!(patch.category.as_deref(), Some("Jazz"));
                let embedding = patch.embedding.unwrap();
                assert_eq!(embedding.vector.len(), 32);
                assert_eq!(embedding.model, "hash-32");
                assert!(patch.mood_tags.unwrap().contains("neutral"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_classifier_failure_maps_to_outcome() {
        let agent = EnricherAgent::new(
            Box::new(FailingClassifier(CollaboratorError::Retryable("rate limited".into()))),
            Box::new(HashEmbedder::new(32)),
        );
        assert_eq!(
            agent.process(&item("x")).await,
            Outcome::Retryable("rate limited".into())
        );
    }

    #[tokio::test]
    async fn test_wrong_vector_length_is_terminal() {
        let agent = EnricherAgent::new(Box::new(KeywordClassifier), Box::new(ShortEmbedder));
        assert!(matches!(agent.process(&item("x")).await, Outcome::Terminal(_)));
    }
}
