//! Rendering of search hits into the text the model reads.

use std::fmt::Write as _;

use crate::search::SearchHit;

const HEADER: &str = "以下是相关最新信息：";
const UNKNOWN_TIME: &str = "未知";

/// Shown to the model when a search finds nothing.
pub const NOT_FOUND: &str = "未找到相关最新信息。";

/// Format hits for a tool-result message. Never returns an empty string.
pub fn format_hits(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return NOT_FOUND.to_owned();
    }

    let mut out = String::from(HEADER);
    out.push('\n');
    for (i, hit) in hits.iter().enumerate() {
        let published = if hit.published_at.trim().is_empty() {
            UNKNOWN_TIME
        } else {
            hit.published_at.trim()
        };
        // Writing into a String cannot fail.
        let _ = write!(
            out,
            "\n{}. {}（发布时间：{}）\n摘要：{}\n链接：{}\n",
            i + 1,
            hit.title,
            published,
            hit.snippet,
            hit.url
        );
    }
    let _ = write!(out, "\n共获取到 {} 条搜索结果。", hits.len());
    out
}

/// Reported after every attempt failed outright.
pub fn search_failed(query: &str, attempts: u32, last_error: &str) -> String {
    format!("搜索“{query}”失败（已尝试 {attempts} 次）：{last_error}")
}

/// Reported after every attempt came back empty.
pub fn no_results(query: &str, attempts: u32) -> String {
    format!("搜索“{query}”在 {attempts} 次尝试后仍未找到结果，请尝试更换或细化搜索关键词。")
}
