//! Agent task prompt rendering.

use std::fmt::Write as _;

use crate::config::Language;
use crate::domain::work_item::WorkItem;

/// Everything the prompt mentions besides the item itself.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub branch: &'a str,
    pub base: &'a str,
    pub lang: Language,
    /// The agent runs in the continent itself and must switch branches.
    pub direct: bool,
}

/// Render the task prompt for `item`.
pub fn build_prompt(item: &WorkItem, ctx: &PromptContext<'_>) -> String {
    match ctx.lang {
        Language::En => english(item, ctx),
        Language::Ja => japanese(item, ctx),
    }
}

fn english(item: &WorkItem, ctx: &PromptContext<'_>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "You are working on issue {}: {}", item.id, item.title);
    if let Some(url) = &item.metadata.url {
        let _ = writeln!(out, "Issue URL: {url}");
    }
    if !item.metadata.labels.is_empty() {
        let _ = writeln!(out, "Labels: {}", item.metadata.labels.join(", "));
    }
    if let Some(description) = &item.metadata.description {
        let _ = writeln!(out, "\n## Description\n{}", description.trim());
    }
    let _ = writeln!(out, "\n## Instructions");
    if ctx.direct {
        let _ = writeln!(
            out,
            "- Create or switch to branch `{}` from `{}` before making changes.",
            ctx.branch, ctx.base
        );
    } else {
        let _ = writeln!(
            out,
            "- You are on branch `{}`, forked from `{}`.",
            ctx.branch, ctx.base
        );
    }
    let _ = writeln!(out, "- Implement the issue completely and keep the change focused.");
    let _ = writeln!(out, "- Run the project's tests and fix any failures you introduce.");
    let _ = writeln!(out, "- Commit your work. Do not push and do not open a pull request.");
    out
}

fn japanese(item: &WorkItem, ctx: &PromptContext<'_>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "課題 {}: {} に取り組んでください。", item.id, item.title);
    if let Some(url) = &item.metadata.url {
        let _ = writeln!(out, "課題URL: {url}");
    }
    if !item.metadata.labels.is_empty() {
        let _ = writeln!(out, "ラベル: {}", item.metadata.labels.join(", "));
    }
    if let Some(description) = &item.metadata.description {
        let _ = writeln!(out, "\n## 説明\n{}", description.trim());
    }
    let _ = writeln!(out, "\n## 指示");
    if ctx.direct {
        let _ = writeln!(
            out,
            "- 変更を始める前に `{}` からブランチ `{}` を作成または切り替えてください。",
            ctx.base, ctx.branch
        );
    } else {
        let _ = writeln!(
            out,
            "- 現在のブランチは `{}` です（`{}` から分岐）。",
            ctx.branch, ctx.base
        );
    }
    let _ = writeln!(out, "- 課題を完全に実装し、変更は必要な範囲に留めてください。");
    let _ = writeln!(out, "- プロジェクトのテストを実行し、発生した失敗を修正してください。");
    let _ = writeln!(out, "- 作業をコミットしてください。プッシュやプルリクエストの作成は不要です。");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::work_item::WorkItemMetadata;

    fn item() -> WorkItem {
        WorkItem::new("MY-42", "Fix login redirect", "Todo").with_metadata(WorkItemMetadata {
            description: Some("Users land on /404 after login.".to_string()),
            url: Some("https://linear.app/acme/issue/MY-42".to_string()),
            priority: Some(2),
            labels: vec!["bug".to_string()],
        })
    }

    fn ctx(lang: Language, direct: bool) -> PromptContext<'static> {
        PromptContext {
            branch: "paintress/my-42",
            base: "main",
            lang,
            direct,
        }
    }

    #[test]
    fn test_english_prompt_names_item_and_branch() {
        let prompt = build_prompt(&item(), &ctx(Language::En, false));
        assert!(prompt.starts_with("You are working on issue MY-42: Fix login redirect"));
        assert!(prompt.contains("Users land on /404"));
        assert!(prompt.contains("You are on branch `paintress/my-42`, forked from `main`"));
        assert!(prompt.contains("Labels: bug"));
    }

    #[test]
    fn test_direct_mode_asks_agent_to_switch_branch() {
        let prompt = build_prompt(&item(), &ctx(Language::En, true));
        assert!(prompt.contains("Create or switch to branch `paintress/my-42` from `main`"));
    }

    #[test]
    fn test_japanese_prompt() {
        let prompt = build_prompt(&item(), &ctx(Language::Ja, false));
        assert!(prompt.contains("課題 MY-42"));
        assert!(prompt.contains("paintress/my-42"));
        assert!(!prompt.contains("You are working"));
    }

    #[test]
    fn test_bare_item_omits_optional_sections() {
        let prompt = build_prompt(&WorkItem::new("MY-1", "t", "Todo"), &ctx(Language::En, false));
        assert!(!prompt.contains("## Description"));
        assert!(!prompt.contains("Issue URL"));
    }
}
