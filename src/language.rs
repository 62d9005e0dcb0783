use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

// Static pre-flight scanning happens here; the sandbox remains the real
// security boundary.
#[derive(Clone)]
pub struct LanguageParams {
    pub order: i32,
    pub name: String,
    deny_list: Vec<(Regex, &'static str)>,
}

impl LanguageParams {
    pub fn prohibited_match(&self, source_text: &str) -> Option<&'static str> {
        self.deny_list
            .iter()
            .find(|(pattern, _)| pattern.is_match(source_text))
            .map(|(_, label)| *label)
    }
}

lazy_static! {
    static ref SUPPORTED_LANGUAGES: Arc<HashMap<String, LanguageParams>> =
        build_supported_languages();
}

pub fn get_supported_languages() -> Arc<HashMap<String, LanguageParams>> {
    SUPPORTED_LANGUAGES.clone()
}

fn build_supported_languages() -> Arc<HashMap<String, LanguageParams>> {
    fn deny(pattern: &str, label: &'static str) -> (Regex, &'static str) {
        (Regex::new(pattern).unwrap(), label)
    }

    let mut languages = HashMap::new();
    languages.insert(
        "python.3".into(),
        LanguageParams {
            order: 1,
            name: "Python 3".into(),
            deny_list: vec![
                deny(r"(?m)^\s*(import|from)\s+os\b", "os module"),
                deny(r"(?m)^\s*(import|from)\s+subprocess\b", "subprocess module"),
                deny(r"(?m)^\s*(import|from)\s+socket\b", "socket module"),
                deny(r"\beval\s*\(", "eval"),
                deny(r"\bexec\s*\(", "exec"),
                deny(r"\b__import__\s*\(", "__import__"),
                deny(r"\bopen\s*\(", "filesystem open"),
            ],
        },
    );
    languages.insert(
        "javascript.node".into(),
        LanguageParams {
            order: 2,
            name: "JavaScript (Node)".into(),
            deny_list: vec![
                deny(
                    r#"require\s*\(\s*["']child_process["']\s*\)"#,
                    "child_process module",
                ),
                deny(r#"require\s*\(\s*["']fs["']\s*\)"#, "fs module"),
                deny(r#"require\s*\(\s*["']net["']\s*\)"#, "net module"),
                deny(r#"from\s+["'](child_process|fs|net)["']"#, "node builtin import"),
                deny(r"\beval\s*\(", "eval"),
                deny(r"\bnew\s+Function\s*\(", "Function constructor"),
                deny(r"\bprocess\s*\.\s*(exit|kill|env)\b", "process access"),
            ],
        },
    );
    languages.insert(
        "rust.stable".into(),
        LanguageParams {
            order: 3,
            name: "Rust (stable)".into(),
            deny_list: vec![
                deny(r"std\s*::\s*process\b", "std::process"),
                deny(r"std\s*::\s*fs\b", "std::fs"),
                deny(r"std\s*::\s*net\b", "std::net"),
                deny(r"include_(str|bytes)!", "include macro"),
                deny(r"\bunsafe\b", "unsafe block"),
            ],
        },
    );
    Arc::new(languages)
}
