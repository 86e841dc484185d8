//! Field/value fallback for pages where no table was found.
//!
//! The orchestrator re-queries such a page exactly once with
//! [`FALLBACK_PROMPT`], which asks for every structured datum on the page as
//! a two-column `Field | Value` table regardless of document type. A page
//! that still yields nothing contributes no tables and no error.

use crate::error::ServiceError;
use crate::output::{Warning, WarningKind};
use crate::pipeline::client::{ExtractionClient, PagePayload};
use crate::pipeline::render::PageImage;
use crate::prompts::FALLBACK_PROMPT;

#[derive(Debug, Clone)]
pub struct FallbackExtractor {
    client: ExtractionClient,
}

impl FallbackExtractor {
    pub fn new(client: ExtractionClient) -> Self {
        Self { client }
    }

    /// Ask for a key/value reading of the page.
    pub async fn extract(&self, page: &PageImage) -> Result<PagePayload, ServiceError> {
        self.client.extract(page, FALLBACK_PROMPT).await
    }

    /// Warning attached to a page whose tables came from the fallback.
    pub fn substitution_warning(page_number: usize) -> Warning {
        Warning::new(
            WarningKind::InconsistentFormat,
            format!(
                "No tabular structure found on page {page_number}; \
                 a field/value interpretation was substituted"
            ),
        )
        .on_page(page_number)
        .with_suggestion("Review the Field/Value sheet, or re-run with guidance describing the layout")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::service::StructuredExtractionService;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    struct Recording {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl StructuredExtractionService for Recording {
        async fn run_structured_extraction(
            &self,
            _image: &PageImage,
            prompt: &str,
        ) -> Result<String, ServiceError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(r#"{"tables": [{"sheetName": "Details", "headers": ["Field", "Value"],
                  "rows": [["Invoice No", "INV-7"]]}]}"#
                .into())
        }
    }

    #[tokio::test]
    async fn uses_fallback_prompt() {
        let service = Arc::new(Recording {
            prompts: Mutex::new(Vec::new()),
        });
        let fallback = FallbackExtractor::new(ExtractionClient::new(service.clone()));
        let payload = fallback
            .extract(&PageImage::png(2, Vec::new()))
            .await
            .unwrap();
        assert_eq!(payload.tables[0].headers, vec!["Field", "Value"]);
        assert_eq!(service.prompts.lock().unwrap().as_slice(), [FALLBACK_PROMPT]);
    }

    #[test]
    fn substitution_warning_names_page() {
        let w = FallbackExtractor::substitution_warning(4);
        assert_eq!(w.kind, WarningKind::InconsistentFormat);
        assert_eq!(w.page_number, Some(4));
        assert!(w.message.contains("page 4"));
    }
}
