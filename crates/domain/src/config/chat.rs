use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation behaviour
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Used when neither the turn nor the assistant supplies a prompt.
    #[serde(default = "d_system_prompt")]
    pub default_system_prompt: String,
    /// System line appended after tool results, before the answer phase.
    #[serde(default = "d_answer_instruction")]
    pub answer_instruction: String,
    /// Appended to the content of an aborted turn.
    #[serde(default = "d_abort_marker")]
    pub abort_marker: String,
    /// Sent when the answer phase produced no text.
    #[serde(default = "d_fallback_reply")]
    pub fallback_reply: String,
    /// Asks the model to turn the user's words into a search query when a
    /// search is forced. `{question}` is replaced with the user text.
    #[serde(default = "d_query_rewrite_instruction")]
    pub query_rewrite_instruction: String,
    #[serde(default = "d_8000")]
    pub query_rewrite_timeout_ms: u64,
    #[serde(default = "d_5")]
    pub heartbeat_secs: u64,
    /// Deadline for the detached history write.
    #[serde(default = "d_10")]
    pub persist_timeout_secs: u64,
    /// How long finalization waits for a cancelled generation to release
    /// its connection.
    #[serde(default = "d_2000")]
    pub stream_close_timeout_ms: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_system_prompt: d_system_prompt(),
            answer_instruction: d_answer_instruction(),
            abort_marker: d_abort_marker(),
            fallback_reply: d_fallback_reply(),
            query_rewrite_instruction: d_query_rewrite_instruction(),
            query_rewrite_timeout_ms: d_8000(),
            heartbeat_secs: d_5(),
            persist_timeout_secs: d_10(),
            stream_close_timeout_ms: d_2000(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_system_prompt() -> String {
    "你是一个乐于助人的智能助手，请用简洁、准确的中文回答用户的问题。".into()
}
fn d_answer_instruction() -> String {
    "请基于搜索结果自然流畅地回答用户问题".into()
}
fn d_abort_marker() -> String {
    "（已中止）".into()
}
fn d_fallback_reply() -> String {
    "抱歉，生成回答时遇到问题，请重试~".into()
}
fn d_query_rewrite_instruction() -> String {
    concat!(
        "请将用户问题转化为一个精准的搜索查询（用自然语言句子表达，而非关键词堆砌）。\n",
        "要求：\n",
        "1. 包含所有关键信息（如时间、地点、事件）；\n",
        "2. 去除冗余语气词，但保留必要上下文；\n",
        "3. 只输出查询本身。\n\n",
        "用户问题：{question}\n",
        "生成的搜索查询：",
    )
    .into()
}
fn d_5() -> u64 {
    5
}
fn d_10() -> u64 {
    10
}
fn d_8000() -> u64 {
    8000
}
fn d_2000() -> u64 {
    2000
}
