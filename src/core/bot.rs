//! Bot response pipeline.
//!
//! Stages run in a fixed order and the first decisive one wins:
//! 1. escalation phrases ("I want a human"),
//! 2. knowledge-base scoring over the active FAQ entries,
//! 3. generative fallback, when a backend is configured,
//! 4. the default reply.
//!
//! Failures in stages 2 and 3 are logged and fall through to the next stage.

use crate::core::traits::{AiAdapter, BotEngine, BotResponse};
use crate::infrastructure::entities::FaqEntry;
use crate::infrastructure::traits::FaqRepository;
use async_trait::async_trait;
use di::{Ref, injectable};
use log::{debug, info, warn};

/// FAQ answer or model output that means "hand this conversation to a person".
pub const HUMAN_HANDOFF_ANSWER: &str = "TRANSFER_TO_HUMAN";

const MIN_MESSAGE_CHARS: usize = 5;
const MIN_KEYWORD_CHARS: usize = 3;
const MIN_FAQ_SCORE: usize = 4;

/// Accented and unaccented forms are both listed; matching is on the lower-cased message.
const ESCALATION_PHRASES: &[&str] = &[
    "nhân viên",
    "nhan vien",
    "gặp người",
    "gap nguoi",
    "người thật",
    "nguoi that",
    "tư vấn viên",
    "tu van vien",
    "hỗ trợ trực tiếp",
    "ho tro truc tiep",
    "chuyển nhân viên",
    "chuyen nhan vien",
    "nói chuyện với người",
    "noi chuyen voi nguoi",
    "talk to human",
    "talk to a human",
    "real person",
    "live agent",
    "human agent",
    "customer service",
];

pub const STANDARD_QUICK_REPLIES: &[&str] = &[
    "Tư vấn chọn sản phẩm",
    "Kiểm tra đơn hàng",
    "Phí vận chuyển",
    "Chính sách đổi trả",
    "Gặp nhân viên",
];

const ESCALATION_ACK: &str = "Mình đang chuyển bạn tới nhân viên tư vấn. Vui lòng chờ trong giây lát, nhân viên sẽ phản hồi sớm nhất có thể.";

const HANDOFF_MESSAGE: &str = "Câu hỏi này cần nhân viên hỗ trợ trực tiếp. Mình đã chuyển yêu cầu của bạn, vui lòng chờ trong giây lát.";

const DEFAULT_REPLY: &str = "Xin lỗi, mình chưa hiểu câu hỏi của bạn. Bạn có thể hỏi về sản phẩm, đơn hàng, phí vận chuyển, chính sách đổi trả, hoặc gõ \"nhân viên\" để được hỗ trợ trực tiếp.";

pub fn standard_quick_replies() -> Vec<String> {
    STANDARD_QUICK_REPLIES
        .iter()
        .map(|reply| reply.to_string())
        .collect()
}

impl BotResponse {
    fn escalate(message: &str) -> BotResponse {
        BotResponse {
            message: message.to_owned(),
            transfer_to_human: true,
            quick_replies: Vec::new(),
        }
    }

    fn answer(message: impl Into<String>, quick_replies: Vec<String>) -> BotResponse {
        BotResponse {
            message: message.into(),
            transfer_to_human: false,
            quick_replies,
        }
    }

    pub fn default_reply() -> BotResponse {
        BotResponse::answer(DEFAULT_REPLY, standard_quick_replies())
    }
}

pub fn wants_human(message: &str) -> bool {
    let lower = message.to_lowercase();
    ESCALATION_PHRASES.iter().any(|phrase| lower.contains(phrase))
}

/// Sum of the character lengths of the entry's keywords found in `lower_message`.
pub fn faq_score(lower_message: &str, entry: &FaqEntry) -> usize {
    entry
        .keyword_tokens()
        .filter(|token| token.chars().count() >= MIN_KEYWORD_CHARS)
        .filter(|token| lower_message.contains(token.as_str()))
        .map(|token| token.chars().count())
        .sum()
}

/// Highest-scoring active entry with a score of at least 4.
///
/// Ties go to the higher priority, then to the lower id.
pub fn best_faq_match<'a>(message: &str, entries: &'a [FaqEntry]) -> Option<&'a FaqEntry> {
    if message.chars().count() < MIN_MESSAGE_CHARS {
        return None;
    }

    let lower = message.to_lowercase();
    entries
        .iter()
        .filter(|entry| entry.is_active)
        .map(|entry| (faq_score(&lower, entry), entry))
        .filter(|(score, _)| *score >= MIN_FAQ_SCORE)
        .max_by(|(score_a, a), (score_b, b)| {
            score_a
                .cmp(score_b)
                .then(a.priority.cmp(&b.priority))
                .then(b.id.cmp(&a.id))
        })
        .map(|(_, entry)| entry)
}

#[injectable(BotEngine)]
pub struct KeywordBotEngine {
    faqs: Ref<dyn FaqRepository>,
    ai: Ref<dyn AiAdapter>,
}

impl KeywordBotEngine {
    async fn knowledge_base_answer(&self, message: &str) -> Option<BotResponse> {
        let entries = match self.faqs.list_active().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("FAQ lookup failed, skipping knowledge base: {e}");
                return None;
            }
        };

        let entry = best_faq_match(message, &entries)?;
        debug!("message matched FAQ entry {}", entry.id);

        if entry.answer.trim() == HUMAN_HANDOFF_ANSWER {
            return Some(BotResponse::escalate(HANDOFF_MESSAGE));
        }
        Some(BotResponse::answer(
            entry.answer.clone(),
            standard_quick_replies(),
        ))
    }

    async fn generated_answer(&self, message: &str) -> Option<BotResponse> {
        if !self.ai.is_available() {
            return None;
        }

        match self.ai.generate_reply(message).await {
            Ok(text) if text.trim() == HUMAN_HANDOFF_ANSWER => {
                info!("AI asked for a human agent");
                Some(BotResponse::escalate(HANDOFF_MESSAGE))
            }
            Ok(text) if !text.trim().is_empty() => {
                Some(BotResponse::answer(text.trim(), Vec::new()))
            }
            Ok(_) => None,
            Err(e) => {
                warn!("AI fallback unavailable: {e}");
                None
            }
        }
    }
}

#[async_trait]
impl BotEngine for KeywordBotEngine {
    async fn respond(&self, message: &str) -> BotResponse {
        if wants_human(message) {
            info!("escalation phrase detected");
            return BotResponse::escalate(ESCALATION_ACK);
        }

        if let Some(response) = self.knowledge_base_answer(message).await {
            return response;
        }

        if let Some(response) = self.generated_answer(message).await {
            return response;
        }

        BotResponse::default_reply()
    }
}
