//! Keyword-driven responder that works offline.

use crate::reply::{Reply, ReplyError, Responder};
use chrono::{DateTime, Local};
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Topic {
    Greeting,
    Farewell,
    Thanks,
    Time,
    Weather,
    Other,
}

/// Checked in order; the first topic with a matching keyword wins.
/// Latin keywords match whole words, CJK keywords match anywhere.
const KEYWORDS: &[(Topic, &[&str])] = &[
    (
        Topic::Greeting,
        &[
            "hi", "hello", "hey", "你好", "您好", "嗨", "早上好", "下午好", "晚上好",
        ],
    ),
    (
        Topic::Farewell,
        &["bye", "goodbye", "再见", "拜拜", "回头见", "告别"],
    ),
    (Topic::Thanks, &["thank", "thanks", "谢谢", "感谢"]),
    (
        Topic::Time,
        &["time", "date", "clock", "today", "时间", "几点", "现在", "日期", "今天"],
    ),
    (
        Topic::Weather,
        &[
            "weather", "rain", "sunny", "cloudy", "temperature", "天气", "气温", "下雨", "晴天",
            "阴天",
        ],
    ),
];

const EN_GREETING: &[&str] = &[
    "Hello! Nice to talk with you.",
    "Hi there! What can I do for you?",
    "Hey! How is your day going?",
];
const EN_FAREWELL: &[&str] = &[
    "Goodbye! Talk to you next time.",
    "Bye! Have a great day.",
    "See you later! Take care.",
];
const EN_THANKS: &[&str] = &[
    "You're welcome! Glad I could help.",
    "Happy to help.",
    "Any time!",
];
const EN_WEATHER: &[&str] = &[
    "I can't see outside, but I hope the weather is nice.",
    "Whatever the weather, I hope you're having a good day.",
    "No window here, so I'll take your word for it.",
];
const EN_OTHER: &[&str] = &[
    "That's an interesting question.",
    "I see what you mean. Let me think about that.",
    "Thanks for sharing that with me.",
    "That makes a lot of sense.",
    "I learned something new there.",
];

const ZH_GREETING: &[&str] = &[
    "你好！很高兴和你聊天！",
    "你好呀！有什么可以帮助你的吗？",
    "嗨！今天心情怎么样？",
];
const ZH_FAREWELL: &[&str] = &[
    "再见！期待下次和你聊天！",
    "拜拜！祝你今天愉快！",
    "下次见！保重身体哦！",
];
const ZH_THANKS: &[&str] = &[
    "不客气！很高兴能帮到你！",
    "这是我应该做的！",
    "能为你服务我很开心！",
];
const ZH_WEATHER: &[&str] = &[
    "今天天气还不错呢！",
    "我看不到窗外的天气，但希望今天是个好天气！",
    "不论什么天气，保持好心情最重要！",
];
const ZH_OTHER: &[&str] = &[
    "这是个很有趣的问题！",
    "我理解你的意思，让我想想。",
    "谢谢你跟我分享这个！",
    "你说得很有道理！",
    "这让我学到了新东西！",
];

/// Replies from fixed templates chosen by keyword, in English or Chinese
/// depending on the message. Templates rotate so repeated questions vary.
pub struct RuleResponder {
    turn: AtomicUsize,
    now: fn() -> DateTime<Local>,
}

impl Default for RuleResponder {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleResponder {
    pub fn new() -> Self {
        Self {
            turn: AtomicUsize::new(0),
            now: Local::now,
        }
    }

    /// Uses `now` instead of the system clock for time replies.
    pub fn with_clock(mut self, now: fn() -> DateTime<Local>) -> Self {
        self.now = now;
        self
    }

    fn topic(message: &str) -> Topic {
        let lower = message.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric() && c != '\'')
            .filter(|w| !w.is_empty())
            .collect();

        for (topic, keywords) in KEYWORDS {
            let hit = keywords.iter().any(|kw| {
                if kw.is_ascii() {
                    words.contains(kw)
                } else {
                    lower.contains(kw)
                }
            });
            if hit {
                return *topic;
            }
        }
        Topic::Other
    }

    fn time_reply(&self, chinese: bool, pick: usize) -> String {
        let now = (self.now)();
        match (chinese, pick % 3) {
            (true, 0) => format!("现在是{}", now.format("%Y年%m月%d日 %H点%M分")),
            (true, 1) => format!("现在是{}，时间过得真快呢！", now.format("%H点%M分")),
            (true, _) => format!("让我看看，今天是{}。", now.format("%Y年%m月%d日")),
            (false, 0) => format!("It's {}.", now.format("%A, %B %-d %Y, %H:%M")),
            (false, 1) => format!("It's {} right now. Time flies!", now.format("%H:%M")),
            (false, _) => format!("Today is {}.", now.format("%A, %B %-d")),
        }
    }
}

/// Whether the message is mostly written in CJK script.
fn is_chinese(message: &str) -> bool {
    let mut cjk = 0usize;
    let mut latin = 0usize;
    for c in message.chars() {
        if ('\u{4e00}'..='\u{9fff}').contains(&c) || ('\u{3400}'..='\u{4dbf}').contains(&c) {
            cjk += 1;
        } else if c.is_ascii_alphabetic() {
            latin += 1;
        }
    }
    cjk > 0 && cjk * 2 >= latin
}

impl Responder for RuleResponder {
    fn generate_reply(&self, message: &str) -> Result<Reply, ReplyError> {
        let pick = self.turn.fetch_add(1, Ordering::Relaxed);
        let chinese = is_chinese(message);
        let topic = Self::topic(message);

        let templates = match (topic, chinese) {
            (Topic::Time, _) => return Ok(Reply::new(self.time_reply(chinese, pick), "rules")),
            (Topic::Greeting, false) => EN_GREETING,
            (Topic::Farewell, false) => EN_FAREWELL,
            (Topic::Thanks, false) => EN_THANKS,
            (Topic::Weather, false) => EN_WEATHER,
            (Topic::Other, false) => EN_OTHER,
            (Topic::Greeting, true) => ZH_GREETING,
            (Topic::Farewell, true) => ZH_FAREWELL,
            (Topic::Thanks, true) => ZH_THANKS,
            (Topic::Weather, true) => ZH_WEATHER,
            (Topic::Other, true) => ZH_OTHER,
        };
        Ok(Reply::new(templates[pick % templates.len()], "rules"))
    }

    fn name(&self) -> &str {
        "rules"
    }

    fn is_available(&self) -> bool {
        true
    }
}
