//! Resume scoring against a job description.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::TextChat;

/// Structured feedback for one resume and job description pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResumeAnalysis {
    /// Fit for the role, out of 10.
    pub rating: f32,
    pub strengths: Vec<String>,
    pub gaps: Vec<String>,
    pub suggestions: ResumeSuggestions,
}

/// Rewrites proposed for the two sections that matter most.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResumeSuggestions {
    pub experience: String,
    pub skills: String,
}

impl ResumeAnalysis {
    /// Parse the model's JSON text. The rating is clamped to 0..=10.
    pub fn from_reply_text(text: &str) -> anyhow::Result<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }
        let mut analysis: Self =
            serde_json::from_str(trimmed).context("resume analysis is not valid JSON")?;
        analysis.rating = if analysis.rating.is_finite() {
            analysis.rating.clamp(0.0, 10.0)
        } else {
            0.0
        };
        Ok(analysis)
    }
}

fn analysis_prompt(resume_text: &str, job_description: &str) -> String {
    format!(
        "You are an experienced hiring manager who tailors resumes.\n\
         \n\
         RESUME:\n{resume_text}\n\
         \n\
         JOB DESCRIPTION:\n{job_description}\n\
         \n\
         Reply with a JSON object of this shape:\n\
         {{\"rating\": number, \"strengths\": string[], \"gaps\": string[], \
         \"suggestions\": {{\"experience\": string, \"skills\": string}}}}\n\
         \n\
         - rating: fit for this specific role, out of 10.\n\
         - strengths: three strengths the candidate brings to this role.\n\
         - gaps: three critical gaps or missing keywords.\n\
         - suggestions: concrete edits to the Experience and Skills sections \
         that align them with the job description."
    )
}

impl TextChat {
    /// Score a resume against a job description.
    pub async fn analyze_resume(
        &self,
        resume_text: &str,
        job_description: &str,
    ) -> anyhow::Result<ResumeAnalysis> {
        let body = json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": analysis_prompt(resume_text, job_description) }]
            }],
            "generationConfig": { "responseMimeType": "application/json" }
        });
        debug!(
            resume_chars = resume_text.len(),
            jd_chars = job_description.len(),
            "Requesting resume analysis"
        );
        let json: Value = self.post(&body).await?;
        let reply = super::text::parse_reply(&json)?;
        ResumeAnalysis::from_reply_text(&reply.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::text::tests::{chat_at, serve_once};

    #[test]
    fn test_parse_full_analysis() {
        let analysis = ResumeAnalysis::from_reply_text(
            r#"{"rating": 7.5, "strengths": ["Rust", "On-call"], "gaps": ["Kubernetes"],
                "suggestions": {"experience": "Quantify the outage work.", "skills": "Add Terraform."}}"#,
        )
        .unwrap();
        assert_eq!(analysis.rating, 7.5);
        assert_eq!(analysis.strengths, vec!["Rust", "On-call"]);
        assert_eq!(analysis.gaps, vec!["Kubernetes"]);
        assert_eq!(analysis.suggestions.skills, "Add Terraform.");
    }

    #[test]
    fn test_missing_fields_and_out_of_range_rating() {
        let analysis = ResumeAnalysis::from_reply_text(r#"{"rating": 14}"#).unwrap();
        assert_eq!(analysis.rating, 10.0);
        assert!(analysis.strengths.is_empty());
        assert_eq!(analysis.suggestions, ResumeSuggestions::default());

        assert_eq!(
            ResumeAnalysis::from_reply_text("  ").unwrap(),
            ResumeAnalysis::default()
        );
        assert!(ResumeAnalysis::from_reply_text("Great resume!").is_err());
    }

    #[tokio::test]
    async fn test_analyze_requests_json_output() {
        let reply = r#"{"rating": 6, "strengths": ["Go"], "gaps": ["SQL"], "suggestions": {"experience": "x", "skills": "y"}}"#;
        let (addr, server) =
            serve_once(json!({"candidates": [{"content": {"parts": [{"text": reply}]}}]})).await;

        let analysis = chat_at(addr)
            .analyze_resume("Go developer, 5 years", "Backend engineer, SQL heavy")
            .await
            .unwrap();
        assert_eq!(analysis.rating, 6.0);
        assert_eq!(analysis.gaps, vec!["SQL"]);

        let request = server.await.unwrap();
        assert!(request.contains(r#""responseMimeType":"application/json""#));
        assert!(request.contains("Backend engineer, SQL heavy"));
        assert!(!request.contains("functionDeclarations"));
    }
}
