use crate::config::{SessionConfiguration, SpokenLanguage};
use crate::ledger::transcript;
use crate::problem::{LearningMaterial, ProblemStatement};
use crate::turn::{FeedbackRequest, QuestionRequest};
use anyhow::{Context, Result};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use serde::Deserialize;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

// The `Oracle` trait is the session's only view of the text-generation
// service. The orchestrator never sees prompts or HTTP; tests script replies
// through `MockOracle`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn generate_problem(&self, config: &SessionConfiguration) -> Result<ProblemStatement>;

    async fn generate_learning_material(
        &self,
        config: &SessionConfiguration,
    ) -> Result<LearningMaterial>;

    async fn ask_question(&self, request: &QuestionRequest) -> Result<String>;

    async fn generate_feedback(&self, request: &FeedbackRequest) -> Result<String>;
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OracleError {
    #[error("No Gemini API keys configured")]
    NoKeys,
    #[error("Generation returned no text")]
    EmptyReply,
    #[error("Generation returned invalid JSON: {0}")]
    Malformed(String),
    #[error("Generated problem is incomplete: missing {0}")]
    MissingField(&'static str),
    #[error("Generation service answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Generation did not answer within {0:?}")]
    Timeout(Duration),
}

/// Bounds an oracle call; expiry is reported like any other generation error.
pub async fn with_timeout<T>(limit: Duration, call: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(OracleError::Timeout(limit).into()),
    }
}

/// Round-robin over the configured API keys.
#[derive(Debug)]
pub struct KeyRing {
    keys: Vec<String>,
    next: AtomicUsize,
}

impl KeyRing {
    pub fn new(keys: impl IntoIterator<Item = String>) -> Result<Self, OracleError> {
        let keys: Vec<String> = keys
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty() && k != "undefined")
            .collect();
        if keys.is_empty() {
            return Err(OracleError::NoKeys);
        }
        Ok(Self {
            keys,
            next: AtomicUsize::new(0),
        })
    }

    pub fn next_key(&self) -> &str {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.keys.len();
        &self.keys[i]
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

/// Oracle backed by the Gemini `generateContent` endpoint.
pub struct GeminiOracle {
    client: Client,
    keys: KeyRing,
    model: String,
    base_url: String,
}

impl GeminiOracle {
    pub fn new(keys: KeyRing, model: String) -> Self {
        Self {
            client: Client::new(),
            keys,
            model,
            base_url: GEMINI_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn generate(&self, prompt: String) -> Result<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        let body = serde_json::json!({
            "contents": [
                { "role": "user", "parts": [ { "text": prompt } ] }
            ]
        });

        let resp = self
            .client
            .post(&url)
            .query(&[("key", self.keys.next_key())])
            .json(&body)
            .send()
            .await
            .context("Failed to reach the generation service")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(OracleError::Status {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let reply = resp
            .json::<GenerateContentResponse>()
            .await
            .context("Failed to decode generation response")?;

        let text: String = reply
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(OracleError::EmptyReply.into());
        }
        Ok(text)
    }
}

#[async_trait]
impl Oracle for GeminiOracle {
    async fn generate_problem(&self, config: &SessionConfiguration) -> Result<ProblemStatement> {
        let text = self.generate(problem_prompt(config)).await?;
        Ok(parse_problem(&text)?)
    }

    async fn generate_learning_material(
        &self,
        config: &SessionConfiguration,
    ) -> Result<LearningMaterial> {
        let text = self.generate(learning_prompt(config)).await?;
        Ok(parse_learning_material(&text)?)
    }

    async fn ask_question(&self, request: &QuestionRequest) -> Result<String> {
        let text = self.generate(question_prompt(request)).await?;
        Ok(clean_question(&text))
    }

    async fn generate_feedback(&self, request: &FeedbackRequest) -> Result<String> {
        let text = self.generate(feedback_prompt(request)).await?;
        Ok(clean_feedback(&text))
    }
}

// --- Output hygiene ---

fn strip_code_fences(text: &str) -> String {
    text.replace("```json", "").replace("```", "").trim().to_string()
}

fn ensure_complete(problem: &ProblemStatement) -> Result<(), OracleError> {
    if problem.title.trim().is_empty() {
        return Err(OracleError::MissingField("title"));
    }
    if problem.description.trim().is_empty() {
        return Err(OracleError::MissingField("description"));
    }
    Ok(())
}

pub fn parse_problem(text: &str) -> Result<ProblemStatement, OracleError> {
    let problem: ProblemStatement = serde_json::from_str(&strip_code_fences(text))
        .map_err(|e| OracleError::Malformed(e.to_string()))?;
    ensure_complete(&problem)?;
    Ok(problem)
}

pub fn parse_learning_material(text: &str) -> Result<LearningMaterial, OracleError> {
    #[derive(Deserialize)]
    struct Raw {
        problem: Option<ProblemStatement>,
        #[serde(default)]
        solution: String,
        #[serde(default)]
        explanation: String,
    }

    let raw: Raw = serde_json::from_str(&strip_code_fences(text))
        .map_err(|e| OracleError::Malformed(e.to_string()))?;
    let problem = raw.problem.ok_or(OracleError::MissingField("problem"))?;
    ensure_complete(&problem)?;
    if raw.solution.trim().is_empty() {
        return Err(OracleError::MissingField("solution"));
    }
    if raw.explanation.trim().is_empty() {
        return Err(OracleError::MissingField("explanation"));
    }
    Ok(LearningMaterial {
        problem,
        solution: raw.solution,
        explanation: raw.explanation,
    })
}

pub fn clean_question(text: &str) -> String {
    text.replace(['*', '#'], "").trim().to_string()
}

pub fn clean_feedback(text: &str) -> String {
    let text = text.replace(['*', '#'], "");

    // Case-insensitive "input/output" -> "input and output". ASCII lowercasing
    // keeps byte offsets aligned with the original.
    const NEEDLE: &str = "input/output";
    let lower = text.to_ascii_lowercase();
    let mut rewritten = String::with_capacity(text.len());
    let mut last = 0;
    for (at, _) in lower.match_indices(NEEDLE) {
        rewritten.push_str(&text[last..at]);
        rewritten.push_str("input and output");
        last = at + NEEDLE.len();
    }
    rewritten.push_str(&text[last..]);

    // Collapse three or more consecutive newlines into a blank line.
    let mut collapsed = String::with_capacity(rewritten.len());
    let mut newlines = 0;
    for ch in rewritten.chars() {
        if ch == '\n' {
            newlines += 1;
            if newlines <= 2 {
                collapsed.push(ch);
            }
        } else {
            newlines = 0;
            collapsed.push(ch);
        }
    }
    collapsed.trim().to_string()
}

// --- Prompts ---

fn problem_prompt(config: &SessionConfiguration) -> String {
    format!(
        r#"Generate ONE {difficulty} coding problem in {language}.

Return STRICT JSON ONLY:

{{
"title": "string",
"description": "string",
"input": "string",
"output": "string"
}}

No explanation. No markdown. No examples."#,
        difficulty = config.difficulty,
        language = config.code_language,
    )
}

fn learning_prompt(config: &SessionConfiguration) -> String {
    format!(
        r#"Generate ONE {difficulty} coding problem in {language}.

Return STRICT JSON ONLY:

{{
  "problem": {{
    "title": "string",
    "description": "string",
    "input": "string",
    "output": "string"
  }},
  "solution": "code as a single string with \n for new lines",
  "explanation": "detailed explanation text"
}}

Language for explanation: {spoken}

Do NOT include markdown or any text outside JSON."#,
        difficulty = config.difficulty,
        language = config.code_language,
        spoken = config.spoken_language,
    )
}

fn question_prompt(request: &QuestionRequest) -> String {
    let history = transcript(&request.conversation);
    let problem = &request.problem;
    match request.spoken_language {
        SpokenLanguage::Hindi => format!(
            r#"आप एक वास्तविक टेक्निकल इंटरव्यूअर हैं।

नियम:
- पहले उम्मीदवार के पिछले उत्तर पर छोटा रिएक्शन दें
- फिर अगला सवाल पूछें
- कोई markdown या symbols इस्तेमाल ना करें

समस्या:
{title}
{description}

उम्मीदवार का कोड:
{code}

पिछली बातचीत:
{history}

अब प्रश्न नंबर {number} पूछें।"#,
            title = problem.title,
            description = problem.description,
            code = request.code,
            history = if history.is_empty() { "कोई नहीं" } else { history.as_str() },
            number = request.question_number,
        ),
        SpokenLanguage::English => format!(
            r#"You are a real technical interviewer.

Rules:
- First react shortly to previous answer
- Then ask next question
- No markdown or symbols

Problem:
{title}
{description}

Candidate Code:
{code}

Conversation:
{history}

Ask question number {number}."#,
            title = problem.title,
            description = problem.description,
            code = request.code,
            history = if history.is_empty() { "None" } else { history.as_str() },
            number = request.question_number,
        ),
    }
}

fn feedback_prompt(request: &FeedbackRequest) -> String {
    let instructions = match request.spoken_language {
        SpokenLanguage::Hindi => {
            r#"उम्मीदवार के इंटरव्यू का छोटा और स्पष्ट फीडबैक दें।

नियम:
- फीडबैक 8 से 10 लाइनों के अंदर होना चाहिए
- भाषा सरल और इंटरव्यू जैसी हो
- कोई markdown या special symbols ना दें
- केवल सामान्य वाक्य प्रयोग करें

संरचना:
शुरुआत में 1 लाइन प्रदर्शन का सार
Strengths: तीन पॉइंट (✔ से शुरू करें)
Improvements: एक या दो पॉइंट (⚠ से शुरू करें)
Optimization Suggestion: कोड को बेहतर बनाने का एक आसान सुझाव
अंत में confidence और communication पर एक छोटा सार"#
        }
        SpokenLanguage::English => {
            r#"Give short and clear interview feedback.

Rules:
- Feedback must be within 8 to 10 lines only
- Keep language simple and professional
- Do NOT use markdown or special symbols like hashes or stars
- Make feedback speech friendly

Structure:
Start with one summary sentence about performance
Strengths: three bullet points starting with ✔
Improvements: one or two bullet points starting with ⚠
Optimization Suggestion: one simple improvement for the code
End with one short summary about confidence and communication"#
        }
    };
    format!(
        "{instructions}\n\nProblem:\n{title}\n\nCode:\n{code}\n\nConversation:\n{history}",
        title = request.problem.title,
        code = request.code,
        history = transcript(&request.conversation),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::ConversationTurn;
    use std::env;

    fn problem() -> ProblemStatement {
        ProblemStatement {
            title: "Two Sum".into(),
            description: "Return indices of two numbers adding to target".into(),
            input_spec: "nums: list, target: int".into(),
            output_spec: "list of two indices".into(),
        }
    }

    #[test]
    fn problem_json_is_parsed_through_fences() {
        let text = "```json\n{\"title\":\"Two Sum\",\"description\":\"Find indices\",\"input\":\"nums\",\"output\":\"pair\"}\n```";
        let problem = parse_problem(text).unwrap();
        assert_eq!(problem.title, "Two Sum");
        assert_eq!(problem.input_spec, "nums");
        assert_eq!(problem.output_spec, "pair");
    }

    #[test]
    fn incomplete_or_invalid_problems_are_rejected() {
        assert_eq!(
            parse_problem(r#"{"title":"","description":"x"}"#),
            Err(OracleError::MissingField("title"))
        );
        assert_eq!(
            parse_problem(r#"{"title":"Two Sum"}"#),
            Err(OracleError::MissingField("description"))
        );
        assert!(matches!(
            parse_problem("Sure! Here is a problem:"),
            Err(OracleError::Malformed(_))
        ));
    }

    #[test]
    fn learning_material_requires_every_part() {
        let ok = r#"{"problem":{"title":"Reverse","description":"Reverse a list"},"solution":"def r(xs): return xs[::-1]","explanation":"Slicing with a negative step"}"#;
        let material = parse_learning_material(ok).unwrap();
        assert_eq!(material.problem.title, "Reverse");
        assert!(material.solution.contains("[::-1]"));

        let missing = r#"{"problem":{"title":"Reverse","description":"Reverse a list"},"solution":"x"}"#;
        assert_eq!(
            parse_learning_material(missing),
            Err(OracleError::MissingField("explanation"))
        );
    }

    #[test]
    fn feedback_is_made_speech_friendly() {
        let raw = "## Summary\n**Good** job.\n\n\n\nHandle INPUT/OUTPUT edge cases.";
        assert_eq!(
            clean_feedback(raw),
            "Summary\nGood job.\n\nHandle input and output edge cases."
        );
        assert_eq!(clean_question("**Why** a #set?"), "Why a set?");
    }

    #[test]
    fn keys_rotate_round_robin() {
        let ring = KeyRing::new(["a", "", "b", "undefined"].map(String::from)).unwrap();
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.next_key(), "a");
        assert_eq!(ring.next_key(), "b");
        assert_eq!(ring.next_key(), "a");
        assert_eq!(KeyRing::new(Vec::<String>::new()).unwrap_err(), OracleError::NoKeys);
    }

    #[test]
    fn question_prompt_carries_history_and_number() {
        let request = QuestionRequest {
            code: "print(1)".into(),
            problem: problem(),
            conversation: vec![
                ConversationTurn::interviewer("Explain your loop"),
                ConversationTurn::candidate("It scans once"),
            ],
            question_number: 2,
            spoken_language: SpokenLanguage::English,
        };
        let prompt = question_prompt(&request);
        assert!(prompt.contains("Interviewer: Explain your loop\nCandidate: It scans once"));
        assert!(prompt.contains("Ask question number 2."));

        let empty = QuestionRequest {
            conversation: Vec::new(),
            question_number: 1,
            ..request
        };
        assert!(question_prompt(&empty).contains("Conversation:\nNone"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_calls_time_out() {
        let result: Result<String> = with_timeout(Duration::from_secs(5), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("late".to_string())
        })
        .await;
        let err = result.unwrap_err();
        assert_eq!(
            err.downcast_ref::<OracleError>(),
            Some(&OracleError::Timeout(Duration::from_secs(5)))
        );
    }

    // Live call against the Gemini API. Ignored by default so that `cargo test`
    // runs without network access; run with `cargo test -- --ignored`.
    #[tokio::test]
    #[ignore]
    async fn test_generate_problem_live() {
        dotenvy::dotenv_override().ok();
        let key = env::var("GEMINI_API_KEY_1").expect("GEMINI_API_KEY_1 not set");
        let oracle = GeminiOracle::new(KeyRing::new(vec![key]).unwrap(), DEFAULT_MODEL.into());
        let config = SessionConfiguration {
            code_language: "Python".into(),
            difficulty: "Easy".into(),
            spoken_language: SpokenLanguage::English,
        };
        let problem = oracle.generate_problem(&config).await.unwrap();
        assert!(!problem.title.is_empty());
        assert!(!problem.description.is_empty());
    }
}
