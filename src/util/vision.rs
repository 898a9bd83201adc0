//! Extraction Gateway: request/response wrapper around the AI vision service.
//!
//! Two fixed prompts run against the same messages endpoint: slip-leg
//! extraction for the operator's posting flow, and the account-verification
//! judgment for the free-unlock claim flow. The model's reply is a text block
//! that must parse as JSON once markdown code fences are stripped.
//!
//! The judgment object is self-reported by a probabilistic model; nothing in
//! this module decides accept/reject. The claim ledger re-derives that from
//! the constituent flags.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::instrument;

use crate::util::env::{EnvErr, Var};
use crate::var;

pub const VISION_API_URL: &str = "https://api.anthropic.com/v1/messages";
pub const VISION_API_VERSION: &str = "2023-06-01";
pub const VISION_MODEL: &str = "claude-sonnet-4-20250514";

const SCAN_MAX_TOKENS: u32 = 2000;
const VERIFY_MAX_TOKENS: u32 = 1000;

const SLIP_SCAN_PROMPT: &str = r#"Read this bet slip / parlay screenshot from ChalkBoard or any sportsbook. Extract EVERY leg in the parlay.

For each leg, extract:
- player: The player name and their prop (e.g. "LeBron James Over 25.5 Points")
- prop: The prop type (e.g. "Over", "Under", "Over/Under", "Moneyline", "Spread")
- line: The line/number (e.g. "O 25.5", "U 3.5", "-110")
- matchup: The two teams playing (e.g. "Lakers vs Celtics")
- sport: One of: NBA, NFL, NCAAB, NCAAF, NHL, MLB, Soccer, UFC, Tennis

Also extract the overall parlay odds if visible.

Respond ONLY with JSON, no markdown backticks:
{
  "legs": [
    {
      "player": "Player Name Prop Description",
      "prop": "Over",
      "line": "O 25.5",
      "matchup": "Team A vs Team B",
      "sport": "NBA"
    }
  ],
  "odds": "+450",
  "num_legs": 2
}

Be thorough - extract ALL legs from the slip. If you can't read a specific field, use your best guess based on context. The player field should contain both the player name AND the prop description."#;

const ACCOUNT_VERIFY_PROMPT: &str = r#"Analyze this screenshot carefully. I need you to verify if this is a REAL ChalkBoard (chalkboard.io) account screenshot showing:

1. It is from the ChalkBoard app/website (look for ChalkBoard branding, logo, UI elements)
2. The user has an account (look for username, account info, balance info)
3. There is evidence of a deposit of at least $10 (look for balance, deposit history, transaction, or funds added)

Respond ONLY with JSON, no markdown backticks:
{
  "is_valid": true/false,
  "is_chalkboard": true/false,
  "has_account": true/false,
  "has_deposit": true/false,
  "deposit_amount": "amount if visible, or 'unknown'",
  "username": "detected username if visible, or 'unknown'",
  "confidence": "high/medium/low",
  "rejection_reason": "reason if not valid, or null"
}

Be strict - if it doesn't clearly look like ChalkBoard, reject it. If there's no visible evidence of a $10+ deposit, reject it. Look for wallet balance, deposit confirmation, transaction history showing funds added."#;

/// Uploaded screenshot: base64 payload plus media type.
#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub data: String,
    pub media_type: String,
}

impl ImagePayload {
    pub fn new(data: String, media_type: Option<String>) -> Self {
        Self {
            data,
            media_type: media_type.unwrap_or_else(|| String::from("image/png")),
        }
    }
}

/// Structured slip extraction. A zero-leg result means the model could not
/// read the slip; that is a usable answer, not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlipScan {
    #[serde(default)]
    pub legs: Vec<ScannedLeg>,
    #[serde(default)]
    pub odds: String,
    #[serde(default)]
    pub num_legs: u32,
}

impl SlipScan {
    pub fn leg_count(&self) -> u32 {
        if self.num_legs > 0 {
            self.num_legs
        } else {
            self.legs.len() as u32
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannedLeg {
    #[serde(default)]
    pub player: String,
    #[serde(default)]
    pub prop: String,
    #[serde(default)]
    pub line: String,
    #[serde(default)]
    pub matchup: String,
    #[serde(default)]
    pub sport: String,
}

/// Account-verification judgment as reported by the model. Every field
/// defaults closed so a partial document can never widen the gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountJudgment {
    #[serde(default)]
    pub is_valid: bool,
    #[serde(default)]
    pub is_chalkboard: bool,
    #[serde(default)]
    pub has_account: bool,
    #[serde(default)]
    pub has_deposit: bool,
    #[serde(default)]
    pub deposit_amount: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub confidence: Option<String>,
    #[serde(default)]
    pub rejection_reason: Option<String>,
}

pub struct VisionGateway {
    client: reqwest::Client,
    api_key: String,
}

impl VisionGateway {
    pub async fn new() -> VisionResult<Self> {
        let api_key = var!(Var::AnthropicApiKey).await?.to_string();

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
        })
    }

    #[instrument(skip(self, image))]
    pub async fn scan_slip(&self, image: &ImagePayload) -> VisionResult<SlipScan> {
        let scan: SlipScan = self.extract(image, SLIP_SCAN_PROMPT, SCAN_MAX_TOKENS).await?;
        tracing::info!(legs = scan.legs.len(), odds = %scan.odds, "scanned slip");

        Ok(scan)
    }

    #[instrument(skip(self, image))]
    pub async fn verify_account(&self, image: &ImagePayload) -> VisionResult<AccountJudgment> {
        let judgment: AccountJudgment = self
            .extract(image, ACCOUNT_VERIFY_PROMPT, VERIFY_MAX_TOKENS)
            .await?;

        tracing::info!(
            is_valid = judgment.is_valid,
            is_chalkboard = judgment.is_chalkboard,
            has_deposit = judgment.has_deposit,
            confidence = ?judgment.confidence,
            "account judgment received"
        );

        Ok(judgment)
    }

    async fn extract<T>(&self, image: &ImagePayload, prompt: &str, max_tokens: u32) -> VisionResult<T>
    where
        T: DeserializeOwned,
    {
        let body = json!({
            "model": VISION_MODEL,
            "max_tokens": max_tokens,
            "messages": [{
                "role": "user",
                "content": [
                    {
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": image.media_type,
                            "data": image.data,
                        },
                    },
                    {
                        "type": "text",
                        "text": prompt,
                    },
                ],
            }],
        });

        let res = self
            .client
            .post(VISION_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", VISION_API_VERSION)
            .json(&body)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            let detail = res.text().await.unwrap_or_default();
            tracing::error!(code = %status, detail = %truncate(&detail, 500), "vision service error");

            return Err(VisionErr::FetchErr(status.to_string()));
        }

        let reply = res.json::<MessagesResponse>().await?;
        parse_reply(&reply.joined_text())
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

impl MessagesResponse {
    fn joined_text(&self) -> String {
        self.content
            .iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text.as_str())
            .collect()
    }
}

/// Strips markdown code-fence wrapping the model sometimes adds despite the
/// prompt's instruction.
pub fn strip_code_fences(raw: &str) -> String {
    raw.replace("```json", "").replace("```", "").trim().to_string()
}

fn parse_reply<T>(raw: &str) -> VisionResult<T>
where
    T: DeserializeOwned,
{
    let clean = strip_code_fences(raw);
    serde_json::from_str(&clean).map_err(|_| {
        tracing::error!(snippet = %truncate(&clean, 500), "unparsable vision reply");
        VisionErr::UnparsableReply
    })
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

pub type VisionResult<T> = core::result::Result<T, VisionErr>;

#[derive(Debug, Error)]
pub enum VisionErr {
    #[error("reqwest error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("while parsing environment vars: {0}")]
    EnvError(#[from] EnvErr),

    #[error("error during vision fetch: {0}")]
    FetchErr(String),

    #[error("vision reply did not parse as the expected shape")]
    UnparsableReply,
}
