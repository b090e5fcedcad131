//! Fixed functional probe battery.

use serde_json::json;

use crate::engine::ToolSpec;

pub struct ReasoningProbe {
    pub id: &'static str,
    pub prompt: &'static str,
    pub expected: &'static str,
}

pub const REASONING_PROBES: [ReasoningProbe; 5] = [
    ReasoningProbe {
        id: "syllogism",
        prompt: "All roses are flowers. All flowers need water. Does a rose need water? Answer only 'yes' or 'no'.",
        expected: "yes",
    },
    ReasoningProbe {
        id: "arithmetic",
        prompt: "What is 17 + 28? Answer with only the number.",
        expected: "45",
    },
    ReasoningProbe {
        id: "word_problem",
        prompt: "If I have 3 boxes with 4 apples each, and I eat 2 apples, how many apples are left? Answer with only the number.",
        expected: "10",
    },
    ReasoningProbe {
        id: "negation",
        prompt: "If it is NOT true that all cats are black, can there be a white cat? Answer only 'yes' or 'no'.",
        expected: "yes",
    },
    ReasoningProbe {
        id: "sequence",
        prompt: "What is the next number in this sequence: 2, 4, 8, 16, ? Answer with only the number.",
        expected: "32",
    },
];

#[derive(Debug, Clone, Copy)]
pub enum InstructionCheck {
    /// Exactly this many non-empty lines.
    LineCount(usize),
    /// Contains the word in uppercase and no lowercase letters at all.
    Uppercase(&'static str),
    /// A JSON object carrying every listed key.
    JsonKeys(&'static [&'static str]),
    /// Word count within `target ± tolerance`.
    WordCount { target: usize, tolerance: usize },
}

pub struct InstructionProbe {
    pub id: &'static str,
    pub prompt: &'static str,
    pub check: InstructionCheck,
}

pub const INSTRUCTION_PROBES: [InstructionProbe; 4] = [
    InstructionProbe {
        id: "format_list",
        prompt: "List exactly 3 colors. Format: one color per line, no numbers, no punctuation.",
        check: InstructionCheck::LineCount(3),
    },
    InstructionProbe {
        id: "format_uppercase",
        prompt: "Write the word 'hello' in uppercase letters only.",
        check: InstructionCheck::Uppercase("HELLO"),
    },
    InstructionProbe {
        id: "format_json_simple",
        prompt: "Return a valid JSON object with exactly two keys: \"name\" (string) and \"age\" (number). Nothing else.",
        check: InstructionCheck::JsonKeys(&["name", "age"]),
    },
    InstructionProbe {
        id: "constraint_length",
        prompt: "Describe the sun in exactly 10 words. Count carefully.",
        check: InstructionCheck::WordCount {
            target: 10,
            tolerance: 2,
        },
    },
];

pub const TOOL_PROMPT: &str = "What is the current weather in Paris, France?";
pub const TOOL_RESTRAINT_PROMPT: &str = "What is the capital of France?";
pub const TOOL_NAME: &str = "get_weather";
pub const TOOL_EXPECTED_LOCATION: &str = "paris";

pub fn weather_tool() -> ToolSpec {
    ToolSpec {
        name: TOOL_NAME.into(),
        description: "Get current weather for a location".into(),
        parameters: json!({
            "type": "object",
            "properties": {
                "location": {"type": "string", "description": "City name"}
            },
            "required": ["location"]
        }),
    }
}

pub const JSON_SCHEMA_PROMPT: &str = r#"Generate a JSON object representing a person with the following structure:
{
  "firstName": string,
  "lastName": string,
  "age": integer (between 0 and 120),
  "email": string (valid email format),
  "active": boolean
}
Return ONLY the JSON, no explanation."#;

pub const PERSON_REQUIRED_KEYS: [&str; 5] = ["firstName", "lastName", "age", "email", "active"];
pub const PERSON_AGE_RANGE: (i64, i64) = (0, 120);

pub struct LanguageProbe {
    pub code: &'static str,
    pub name: &'static str,
    pub comprehension_prompt: &'static str,
    pub comprehension_expected: &'static [&'static str],
    pub greeting_expected: &'static [&'static str],
}

impl LanguageProbe {
    /// English has nothing to translate into and only gets the
    /// comprehension question.
    pub fn generation_prompt(&self) -> Option<String> {
        (self.code != "en").then(|| {
            format!(
                "Translate the English word 'Hello' into {}. Return ONLY the translated word.",
                self.name
            )
        })
    }
}

pub const LANGUAGE_PROBES: [LanguageProbe; 11] = [
    LanguageProbe {
        code: "en",
        name: "English",
        comprehension_prompt: "What color is the sky on a clear day? Answer in one word.",
        comprehension_expected: &["blue", "azure", "clear"],
        greeting_expected: &["hello", "hi", "greetings"],
    },
    LanguageProbe {
        code: "fr",
        name: "French",
        comprehension_prompt: "De quelle couleur est le ciel par temps clair ? Répondez en un mot.",
        comprehension_expected: &["bleu", "bleue", "azur", "claire"],
        greeting_expected: &["bonjour", "salut", "coucou"],
    },
    LanguageProbe {
        code: "es",
        name: "Spanish",
        comprehension_prompt: "¿De qué color es el cielo en un día despejado? Responde en una palabra.",
        comprehension_expected: &["azul", "celeste", "claro"],
        greeting_expected: &["hola", "buenos días", "buenas"],
    },
    LanguageProbe {
        code: "de",
        name: "German",
        comprehension_prompt: "Welche Farbe hat der Himmel an einem klaren Tag? Antworte mit einem Wort.",
        comprehension_expected: &["blau", "himmelblau", "klar"],
        greeting_expected: &["hallo", "guten tag", "hi"],
    },
    LanguageProbe {
        code: "it",
        name: "Italian",
        comprehension_prompt: "Di che colore è il cielo in una giornata limpida? Rispondi con una parola.",
        comprehension_expected: &["blu", "azzurro", "celeste"],
        greeting_expected: &["ciao", "salve", "buongiorno"],
    },
    LanguageProbe {
        code: "pt",
        name: "Portuguese",
        comprehension_prompt: "Qual é a cor do céu em um dia claro? Responda em uma palavra.",
        comprehension_expected: &["azul", "celeste", "claro"],
        greeting_expected: &["olá", "oi", "bom dia"],
    },
    LanguageProbe {
        code: "zh",
        name: "Chinese",
        comprehension_prompt: "晴天时天空是什么颜色？用一个词回答。",
        comprehension_expected: &["蓝", "天蓝", "青"],
        greeting_expected: &["你好", "您好"],
    },
    LanguageProbe {
        code: "ja",
        name: "Japanese",
        comprehension_prompt: "晴れた日の空は何色ですか？一言で答えてください。",
        comprehension_expected: &["青", "ブルー", "水色"],
        greeting_expected: &["こんにちは", "ハロー"],
    },
    LanguageProbe {
        code: "ko",
        name: "Korean",
        comprehension_prompt: "맑은 날 하늘은 무슨 색인가요? 한 단어로 대답하세요.",
        comprehension_expected: &["파란", "파랑", "푸른", "하늘색"],
        greeting_expected: &["안녕하세요", "안녕"],
    },
    LanguageProbe {
        code: "ar",
        name: "Arabic",
        comprehension_prompt: "ما لون السماء في يوم صافٍ؟ أجب بكلمة واحدة.",
        comprehension_expected: &["أزرق", "زرقاء", "سماوي"],
        greeting_expected: &["مرحبا", "أهلا", "السلام عليكم"],
    },
    LanguageProbe {
        code: "ru",
        name: "Russian",
        comprehension_prompt: "Какого цвета небо в ясный день? Ответьте одним словом.",
        comprehension_expected: &["голубой", "синий", "лазурный"],
        greeting_expected: &["привет", "здравствуйте"],
    },
];

/// Long-form prompt used for every context tier call.
pub const TIER_PROMPT: &str =
    "Write a detailed technical explanation about how neural networks learn through backpropagation.";
