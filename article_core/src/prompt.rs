//! Prompt texts sent to the language model.

use crate::model::{Article, ChatMessage, ChatRole, GenerateRequest};

/// How many past chat messages are replayed to the assistant.
pub const CHAT_HISTORY_WINDOW: usize = 5;

pub fn article_prompt(request: &GenerateRequest) -> String {
    let level = request.level;
    format!(
        r#"
Role: Professional JLPT Exam Setter (日本語能力試験出題者).
Task: Create a reading comprehension passage (Dokkai / 読解) for JLPT Level {level}.
Topic: {topic}
Genre: {genre}

Structure:
1. Title (Japanese)
2. Summary (Chinese, max 100 chars)
3. Paragraphs (Introduction -> Body -> Conclusion)

Output Format: **Minified JSON** (Strictly follow keys to save tokens).
Keys:
- t: Title
- s: Summary
- ps: Paragraphs Array
  - ts: Tokens Array
    - w: Word/Surface
    - r: Reading (only if Kanji, else null/omit)
    - tg: isTarget (boolean, mark 10-15 key words for {level})
    - d: isDifficult (boolean, only for rare words above {level})
    - m: Meaning (Chinese, ONLY for target words)
    - a: Advice (Exam tip, ONLY for target words)

Example:
{{
  "t": "夏休みの思い出",
  "s": "讲述了暑假去海边的经历...",
  "ps": [
    {{ "ts": [ {{ "w": "私", "tg": false }}, {{ "w": "は", "tg": false }} ] }},
    {{ "ts": [ {{ "w": "海", "r": "うみ", "tg": true, "m": "大海", "a": "基础名词" }} ] }}
  ]
}}

Requirements:
- Article Length: **1000+ characters** (Create a rich, full-length story).
- Grammar: Strictly JLPT {level}.
- Order: You MUST output 't' then 's' then 'ps'.
- **NO MARKDOWN**. START DIRECTLY WITH '{{'.
"#,
        topic = request.topic,
        genre = request.genre.label(),
    )
}

pub fn explain_prompt(word: &str, context: &str) -> String {
    format!(
        r#"Role: Japanese-Chinese Dictionary. Context: "{context}". Target: "{word}".
Return JSON: {{ "reading": "...", "meaning": "..." }}.

CRITICAL RULES:
1. "meaning" MUST be in Simplified Chinese (简体中文). DO NOT USE ENGLISH.
2. Even if the word is Katakana (e.g., コンピュータ), explain it in Chinese (e.g., 电脑).
3. "reading" should be Hiragana.
"#
    )
}

pub fn translate_prompt(text: &str) -> String {
    format!("Translate to Simplified Chinese: \"{text}\"")
}

pub fn chat_prompt(message: &str, article: &Article, history: &[ChatMessage]) -> String {
    let start = history.len().saturating_sub(CHAT_HISTORY_WINDOW);
    let history_text = history[start..]
        .iter()
        .map(|m| {
            let who = match m.role {
                ChatRole::User => "User",
                ChatRole::Ai => "AI",
            };
            format!("{who}: {}", m.content)
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Context:
{context}

History:
{history_text}

User: {message}

Role: Japanese Learning Assistant (日本語学習アシスタント).
Tone: Cute, cheerful, using Kaomoji (like (*^▽^*), (o^ ^o)), but very helpful and clear.
Task: Answer questions about the article, explain grammar, or meanings in Simplified Chinese.
Markdown: You CAN use **bold**, *italic*, `code`, and lists.
"#,
        context = article.plain_text(),
    )
}
