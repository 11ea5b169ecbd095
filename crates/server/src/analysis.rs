//! AI analysis collaborator.
//!
//! The single most failure-prone step of the answer pipeline. The raw
//! answer is always persisted before this runs, so a network failure,
//! timeout, or unparseable reply loses no candidate data.

use std::time::Duration;

use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::warn;

use hireloop_protocol::AnswerAnalysis;

/// Collaborator interface for scoring an answer against its question.
pub trait AnswerAnalyzer: Send + Sync {
    fn analyze<'a>(
        &'a self,
        question: &'a str,
        answer: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<AnswerAnalysis>>;
}

const SYSTEM_PROMPT: &str = "You are an interview answer grader. Given a question and a \
candidate's answer, reply with ONLY a JSON object with these fields: \
relevance_score (0-100 number), key_strengths (array of strings), \
areas_of_improvement (array of strings), alignment (short string), \
follow_up_questions (array of strings). No prose outside the JSON.";

/// OpenAI-backed analyzer. The API key is resolved per call so the server
/// can start without one configured; calls then fail as domain errors.
pub struct OpenAiAnalyzer {
    client: reqwest::Client,
    model: String,
    timeout: Duration,
}

impl OpenAiAnalyzer {
    pub fn new(model: String, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            model,
            timeout,
        }
    }

    async fn call(&self, question: &str, answer: &str) -> anyhow::Result<AnswerAnalysis> {
        let api_key = resolve_api_key()
            .ok_or_else(|| anyhow::anyhow!("no API key configured (set OPENAI_API_KEY)"))?;

        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0.2,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                {
                    "role": "user",
                    "content": format!("Question: {question}\n\nAnswer: {answer}")
                }
            ]
        });

        let resp = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("analysis API error {}: {}", status, text);
        }

        let json: serde_json::Value = resp.json().await?;
        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("");
        parse_analysis(content)
    }
}

impl AnswerAnalyzer for OpenAiAnalyzer {
    fn analyze<'a>(
        &'a self,
        question: &'a str,
        answer: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<AnswerAnalysis>> {
        Box::pin(async move {
            match tokio::time::timeout(self.timeout, self.call(question, answer)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        component = "analysis",
                        event = "analysis.timeout",
                        timeout_secs = self.timeout.as_secs(),
                        "Answer analysis timed out"
                    );
                    anyhow::bail!("analysis timed out after {}s", self.timeout.as_secs())
                }
            }
        })
    }
}

fn resolve_api_key() -> Option<String> {
    std::env::var("OPENAI_API_KEY")
        .ok()
        .filter(|key| !key.is_empty())
}

/// Shape of the model's JSON reply. `relevance_score` arrives as a number
/// or a string depending on the model's mood; both are accepted.
#[derive(Deserialize)]
struct RawAnalysis {
    relevance_score: serde_json::Value,
    #[serde(default)]
    key_strengths: Vec<String>,
    #[serde(default)]
    areas_of_improvement: Vec<String>,
    #[serde(default)]
    alignment: Option<String>,
    #[serde(default)]
    follow_up_questions: Vec<String>,
}

/// Parse the model's reply into a validated analysis.
///
/// A non-numeric relevance score is a domain error, never a crash.
pub fn parse_analysis(content: &str) -> anyhow::Result<AnswerAnalysis> {
    let raw: RawAnalysis = serde_json::from_str(strip_code_fence(content))
        .map_err(|e| anyhow::anyhow!("unparseable analysis reply: {e}"))?;

    let relevance_score = parse_relevance(&raw.relevance_score)
        .ok_or_else(|| anyhow::anyhow!("non-numeric relevance score: {}", raw.relevance_score))?;

    Ok(AnswerAnalysis {
        relevance_score: clamp_score(relevance_score),
        key_strengths: raw.key_strengths,
        areas_of_improvement: raw.areas_of_improvement,
        alignment: raw.alignment,
        follow_up_questions: raw.follow_up_questions,
    })
}

/// Accept `85`, `85.5`, `"85"`, `"85%"`, `"85/100"`.
fn parse_relevance(value: &serde_json::Value) -> Option<f64> {
    if let Some(n) = value.as_f64() {
        return Some(n);
    }
    let s = value.as_str()?.trim();
    let s = s.strip_suffix("/100").unwrap_or(s);
    let s = s.strip_suffix('%').unwrap_or(s);
    s.trim().parse().ok()
}

/// AI-derived scores are clamped into range rather than rejected; the
/// model occasionally returns 102 or -1 and the answer is already graded.
pub fn clamp_score(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}

/// Models wrap JSON in markdown fences often enough to handle it here.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numeric_and_string_scores() {
        for (input, expected) in [
            (serde_json::json!(85), 85.0),
            (serde_json::json!(85.5), 85.5),
            (serde_json::json!("85"), 85.0),
            (serde_json::json!("85%"), 85.0),
            (serde_json::json!("85/100"), 85.0),
            (serde_json::json!(" 42 "), 42.0),
        ] {
            assert_eq!(parse_relevance(&input), Some(expected), "input: {input}");
        }
    }

    #[test]
    fn rejects_non_numeric_scores() {
        assert_eq!(parse_relevance(&serde_json::json!("excellent")), None);
        assert_eq!(parse_relevance(&serde_json::json!(null)), None);
        assert_eq!(parse_relevance(&serde_json::json!(["85"])), None);
    }

    #[test]
    fn clamps_out_of_range_model_scores() {
        assert_eq!(clamp_score(120.0), 100.0);
        assert_eq!(clamp_score(-3.0), 0.0);
        assert_eq!(clamp_score(55.0), 55.0);
    }

    #[test]
    fn parses_full_reply() {
        let content = r#"{
            "relevance_score": "90",
            "key_strengths": ["clear explanation"],
            "areas_of_improvement": ["no examples"],
            "alignment": "strong",
            "follow_up_questions": ["Can you give a concrete example?"]
        }"#;

        let analysis = parse_analysis(content).unwrap();
        assert_eq!(analysis.relevance_score, 90.0);
        assert_eq!(analysis.key_strengths, vec!["clear explanation"]);
        assert_eq!(analysis.alignment.as_deref(), Some("strong"));
        assert_eq!(analysis.follow_up_questions.len(), 1);
    }

    #[test]
    fn parses_fenced_reply() {
        let content = "```json\n{\"relevance_score\": 70}\n```";
        let analysis = parse_analysis(content).unwrap();
        assert_eq!(analysis.relevance_score, 70.0);
        assert!(analysis.key_strengths.is_empty());
    }

    #[test]
    fn unparseable_reply_is_a_domain_error() {
        assert!(parse_analysis("I would rate this answer highly.").is_err());
        assert!(parse_analysis("{\"relevance_score\": \"superb\"}").is_err());
    }
}
