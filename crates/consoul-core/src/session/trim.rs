use crate::providers::{Message, Role};
use async_trait::async_trait;
use thiserror::Error;

/// Parameters for the "keep-last" trimming strategy (§4.8).
#[derive(Debug, Clone, Copy)]
pub struct TrimConfig {
    pub context_window: usize,
    pub reserve_tokens: usize,
    /// Above this many messages, summarize the prefix instead of dropping
    /// it outright. `None` disables summarization.
    pub summarize_threshold: Option<usize>,
    /// Messages kept verbatim after the prefix is summarized.
    pub keep_recent: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrimError {
    #[error("reserve_tokens ({reserve_tokens}) >= context_window ({context_window})")]
    TokenLimitExceeded { reserve_tokens: usize, context_window: usize },
}

/// Anything that can compress a run of messages into one summary message —
/// backed by the main model or a configured secondary summarization model
/// (§4.8). A no-op `Summarizer` that just concatenates is fine for tests.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, messages: &[Message]) -> anyhow::Result<String>;
}

/// Keeps the system message (if any) plus the most recent messages that fit
/// `context_window - reserve_tokens`, without splitting any single message.
/// Never summarizes — see `trim_and_summarize` for that path. Idempotent:
/// re-running on an already-trimmed slice returns it unchanged.
pub fn trim_keep_last(
    messages: &[Message],
    cfg: &TrimConfig,
    estimate_tokens: impl Fn(&Message) -> usize,
) -> Result<Vec<Message>, TrimError> {
    if cfg.reserve_tokens >= cfg.context_window {
        return Err(TrimError::TokenLimitExceeded {
            reserve_tokens: cfg.reserve_tokens,
            context_window: cfg.context_window,
        });
    }
    let budget = cfg.context_window - cfg.reserve_tokens;

    let (system, rest): (Vec<&Message>, Vec<&Message>) = match messages.first() {
        Some(m) if matches!(m.role, Role::System) => (vec![m], messages[1..].iter().collect()),
        _ => (Vec::new(), messages.iter().collect()),
    };

    let system_tokens: usize = system.iter().map(|m| estimate_tokens(m)).sum();
    let mut remaining = budget.saturating_sub(system_tokens);

    let mut kept_rev: Vec<&Message> = Vec::new();
    for m in rest.iter().rev() {
        let cost = estimate_tokens(m);
        if cost > remaining && !kept_rev.is_empty() {
            break;
        }
        kept_rev.push(m);
        remaining = remaining.saturating_sub(cost);
    }
    kept_rev.reverse();

    let mut out: Vec<Message> = system.into_iter().cloned().collect();
    out.extend(kept_rev.into_iter().cloned());
    Ok(out)
}

/// Same budget check as `trim_keep_last`, but when the message count is at
/// or above `summarize_threshold`, compacts everything except the system
/// message and the last `keep_recent` messages into one summary message via
/// `summarizer` (§4.8). Falls back to plain keep-last trimming when
/// summarization isn't configured or the threshold isn't met.
pub async fn trim_and_summarize(
    messages: &[Message],
    cfg: &TrimConfig,
    estimate_tokens: impl Fn(&Message) -> usize,
    summarizer: Option<&dyn Summarizer>,
) -> Result<Vec<Message>, TrimError> {
    if cfg.reserve_tokens >= cfg.context_window {
        return Err(TrimError::TokenLimitExceeded {
            reserve_tokens: cfg.reserve_tokens,
            context_window: cfg.context_window,
        });
    }

    let Some(threshold) = cfg.summarize_threshold else {
        return trim_keep_last(messages, cfg, estimate_tokens);
    };
    let Some(summarizer) = summarizer else {
        return trim_keep_last(messages, cfg, estimate_tokens);
    };
    if messages.len() < threshold {
        return trim_keep_last(messages, cfg, estimate_tokens);
    }

    let has_system = messages.first().is_some_and(|m| matches!(m.role, Role::System));
    let system_count = usize::from(has_system);
    let split = messages.len().saturating_sub(cfg.keep_recent).max(system_count);

    let prefix = &messages[system_count..split.max(system_count)];
    let recent = &messages[split.max(system_count)..];

    if prefix.is_empty() {
        return trim_keep_last(messages, cfg, estimate_tokens);
    }

    let summary_text = summarizer
        .summarize(prefix)
        .await
        .map_err(|_| TrimError::TokenLimitExceeded {
            reserve_tokens: cfg.reserve_tokens,
            context_window: cfg.context_window,
        })?;

    let mut out = Vec::new();
    if has_system {
        out.push(messages[0].clone());
    }
    // Role::Assistant, not System — Session::validate rejects any System
    // message past index 0, and the real system prompt already occupies it.
    out.push(Message::assistant(format!("[conversation summary]\n{summary_text}")));
    out.extend(recent.iter().cloned());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(m: &Message) -> usize {
        m.content.len().max(1)
    }

    #[test]
    fn reserve_exceeding_window_is_an_error() {
        let cfg = TrimConfig { context_window: 10, reserve_tokens: 10, summarize_threshold: None, keep_recent: 2 };
        let err = trim_keep_last(&[], &cfg, tokens).unwrap_err();
        assert_eq!(
            err,
            TrimError::TokenLimitExceeded { reserve_tokens: 10, context_window: 10 }
        );
    }

    #[test]
    fn keeps_system_message_and_most_recent_within_budget() {
        let cfg = TrimConfig { context_window: 25, reserve_tokens: 5, summarize_threshold: None, keep_recent: 0 };
        let messages = vec![
            Message::system("sys"),
            Message::user("a".repeat(5)),
            Message::user("b".repeat(5)),
            Message::user("c".repeat(5)),
            Message::user("d".repeat(5)),
        ];
        let trimmed = trim_keep_last(&messages, &cfg, tokens).unwrap();
        assert!(matches!(trimmed[0].role, Role::System));
        // budget 20 after reserve; system costs 3, leaves 17 -> 3 most recent fit (15)
        assert!(trimmed.len() <= messages.len());
        assert_eq!(trimmed.last().unwrap().content, "d".repeat(5));
    }

    #[test]
    fn never_splits_a_single_message() {
        let cfg = TrimConfig { context_window: 3, reserve_tokens: 1, summarize_threshold: None, keep_recent: 0 };
        let messages = vec![Message::user("x".repeat(100))];
        let trimmed = trim_keep_last(&messages, &cfg, tokens).unwrap();
        assert_eq!(trimmed.len(), 1);
        assert_eq!(trimmed[0].content.len(), 100);
    }

    #[test]
    fn idempotent_on_already_trimmed_input() {
        let cfg = TrimConfig { context_window: 100, reserve_tokens: 10, summarize_threshold: None, keep_recent: 0 };
        let messages = vec![Message::system("sys"), Message::user("hi")];
        let once = trim_keep_last(&messages, &cfg, tokens).unwrap();
        let twice = trim_keep_last(&once, &cfg, tokens).unwrap();
        assert_eq!(
            once.iter().map(|m| m.content.clone()).collect::<Vec<_>>(),
            twice.iter().map(|m| m.content.clone()).collect::<Vec<_>>()
        );
    }

    struct StubSummarizer;

    #[async_trait]
    impl Summarizer for StubSummarizer {
        async fn summarize(&self, messages: &[Message]) -> anyhow::Result<String> {
            Ok(format!("{} messages summarized", messages.len()))
        }
    }

    #[tokio::test]
    async fn summarizes_prefix_above_threshold_and_keeps_recent_verbatim() {
        let cfg = TrimConfig { context_window: 100_000, reserve_tokens: 10, summarize_threshold: Some(4), keep_recent: 2 };
        let messages = vec![
            Message::system("sys"),
            Message::user("one"),
            Message::user("two"),
            Message::user("three"),
            Message::user("four"),
        ];
        let trimmed = trim_and_summarize(&messages, &cfg, tokens, Some(&StubSummarizer)).await.unwrap();
        assert!(matches!(trimmed[0].role, Role::System));
        assert!(trimmed[1].content.contains("summarized"));
        assert_eq!(trimmed[trimmed.len() - 1].content, "four");
        assert_eq!(trimmed[trimmed.len() - 2].content, "three");
    }

    #[tokio::test]
    async fn below_threshold_falls_back_to_keep_last() {
        let cfg = TrimConfig { context_window: 1000, reserve_tokens: 10, summarize_threshold: Some(50), keep_recent: 2 };
        let messages = vec![Message::user("hi")];
        let trimmed = trim_and_summarize(&messages, &cfg, tokens, Some(&StubSummarizer)).await.unwrap();
        assert_eq!(trimmed.len(), 1);
    }
}
