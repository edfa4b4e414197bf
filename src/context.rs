use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::config::ProductConfig;

/// Free-form note used as reply context. No embeddings; retrieval is
/// keyword overlap only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextDocument {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// JSON-file backed store of reply-context documents, seeded with the
/// product defaults on first use.
pub struct ContextStore {
    path: PathBuf,
    documents: Mutex<Vec<ContextDocument>>,
}

impl ContextStore {
    pub fn load(path: &str, product: &ProductConfig) -> Self {
        let path = PathBuf::from(path);
        let documents = match std::fs::read_to_string(&path) {
            Ok(data) => match serde_json::from_str::<Vec<ContextDocument>>(&data) {
                Ok(documents) => {
                    log::info!("Loaded {} context documents", documents.len());
                    documents
                }
                Err(e) => {
                    log::error!("Error loading context store {}: {e}", path.display());
                    Vec::new()
                }
            },
            Err(_) => {
                let documents = default_documents(product);
                let store = ContextStore {
                    path: path.clone(),
                    documents: Mutex::new(documents),
                };
                store.save();
                log::info!("Initialized context store with default documents");
                return store;
            }
        };
        ContextStore {
            path,
            documents: Mutex::new(documents),
        }
    }

    fn save(&self) {
        let documents = self.documents.lock().unwrap();
        if let Some(dir) = self.path.parent().filter(|d| *d != Path::new("")) {
            if let Err(e) = std::fs::create_dir_all(dir) {
                log::error!("Error creating {}: {e}", dir.display());
                return;
            }
        }
        match serde_json::to_string_pretty(&*documents) {
            Ok(data) => {
                if let Err(e) = std::fs::write(&self.path, data) {
                    log::error!("Error saving context store {}: {e}", self.path.display());
                }
            }
            Err(e) => log::error!("Error serializing context store: {e}"),
        }
    }

    /// Insert or replace by id.
    pub fn add(&self, document: ContextDocument) {
        {
            let mut documents = self.documents.lock().unwrap();
            if let Some(existing) = documents.iter_mut().find(|d| d.id == document.id) {
                *existing = document;
            } else {
                documents.push(document);
            }
        }
        self.save();
    }

    pub fn delete(&self, id: &str) -> bool {
        let removed = {
            let mut documents = self.documents.lock().unwrap();
            let before = documents.len();
            documents.retain(|d| d.id != id);
            documents.len() < before
        };
        if removed {
            self.save();
        }
        removed
    }

    pub fn all(&self) -> Vec<ContextDocument> {
        self.documents.lock().unwrap().clone()
    }

    /// Case-insensitive whitespace-token overlap, highest score first.
    /// Documents with no overlapping token are omitted.
    pub fn search(&self, query: &str, limit: usize) -> Vec<ContextDocument> {
        let query = query.to_lowercase();
        let words: Vec<&str> = query.split_whitespace().collect();
        let documents = self.documents.lock().unwrap();

        let mut scored: Vec<(usize, &ContextDocument)> = documents
            .iter()
            .map(|doc| {
                let content = doc.content.to_lowercase();
                let score = words.iter().filter(|w| content.contains(**w)).count();
                (score, doc)
            })
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored
            .into_iter()
            .take(limit)
            .map(|(_, doc)| doc.clone())
            .collect()
    }

    /// Top-3 matching documents concatenated for prompt context.
    pub fn relevant_context(&self, content: &str) -> String {
        let matches = self.search(content, 3);
        if matches.is_empty() {
            return "No specific context found.".to_string();
        }
        matches
            .iter()
            .map(|d| d.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

fn default_documents(product: &ProductConfig) -> Vec<ContextDocument> {
    vec![
        ContextDocument {
            id: "product-info".to_string(),
            content: format!(
                "Product: {}\nDescription: {}",
                product.name, product.outreach_agenda
            ),
            metadata: HashMap::from([("type".to_string(), "product".to_string())]),
        },
        ContextDocument {
            id: "meeting-link".to_string(),
            content: format!("Meeting booking link: {}", product.meeting_link),
            metadata: HashMap::from([("type".to_string(), "meeting".to_string())]),
        },
        ContextDocument {
            id: "response-template-interested".to_string(),
            content: format!(
                "When someone shows interest, thank them and share the meeting link: {}",
                product.meeting_link
            ),
            metadata: HashMap::from([("type".to_string(), "template".to_string())]),
        },
        ContextDocument {
            id: "response-template-questions".to_string(),
            content: "When someone has questions, provide clear answers and offer to schedule a \
                      call to discuss further."
                .to_string(),
            metadata: HashMap::from([("type".to_string(), "template".to_string())]),
        },
    ]
}
