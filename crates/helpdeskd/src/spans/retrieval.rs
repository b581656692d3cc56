//! Web-search output handling and document formatting for prompts.

use helpdesk_shared::Document;
use serde_json::Value;

const NO_CITATION_TITLE: &str = "Search Results";

/// Query sent to the search tool, scoped to the documentation site
pub fn scoped_query(site: &str, query: &str) -> String {
    if site.is_empty() {
        query.to_string()
    } else {
        format!("site:{} {}", site, query)
    }
}

/// Turn a Responses API payload into documents.
///
/// URL citations become documents (title falls back to the URL). The output
/// text goes onto the first document, or becomes a single url-less document
/// when nothing was cited. If several text blocks are present the last wins.
pub fn parse_search_output(response: &Value) -> Vec<Document> {
    let mut documents = Vec::new();
    let mut text = String::new();

    let items = response["output"].as_array().map(Vec::as_slice).unwrap_or(&[]);
    for item in items.iter().filter(|i| i["type"] == "message") {
        let blocks = item["content"].as_array().map(Vec::as_slice).unwrap_or(&[]);
        for block in blocks.iter().filter(|b| b["type"] == "output_text") {
            text = block["text"].as_str().unwrap_or_default().to_string();

            let annotations = block["annotations"].as_array().map(Vec::as_slice).unwrap_or(&[]);
            for ann in annotations {
                let Some(url) = ann["url"].as_str() else {
                    continue;
                };
                let title = ann["title"].as_str().unwrap_or(url);
                documents.push(Document::new(title, url, ""));
            }
        }
    }

    if !text.is_empty() {
        match documents.first_mut() {
            Some(first) => first.content = text,
            None => documents.push(Document::new(NO_CITATION_TITLE, "", text)),
        }
    }
    documents
}

/// `[title](url)\ncontent` blocks for the generator prompt
pub fn format_for_generation(documents: &[Document]) -> String {
    if documents.is_empty() {
        return "No documentation found.".to_string();
    }
    documents
        .iter()
        .map(|d| format!("[{}]({})\n{}", d.title, d.url, d.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// `[title]\ncontent` blocks for the judge prompt
pub fn format_for_judge(documents: &[Document]) -> String {
    if documents.is_empty() {
        return "No documents.".to_string();
    }
    documents
        .iter()
        .map(|d| format!("[{}]\n{}", d.title, d.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}
