//! Functional probes: reasoning, instruction following, tool calling, JSON
//! conformance and language support.
//!
//! A probe that errors or answers badly is a data point. Only an unreachable
//! engine aborts the battery.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};

use crate::battery::{
    self, InstructionCheck, INSTRUCTION_PROBES, JSON_SCHEMA_PROMPT, LANGUAGE_PROBES,
    PERSON_AGE_RANGE, PERSON_REQUIRED_KEYS, REASONING_PROBES, TOOL_EXPECTED_LOCATION, TOOL_NAME,
    TOOL_PROMPT, TOOL_RESTRAINT_PROMPT,
};
use crate::engine::{Generation, GenerationRequest, InferenceEngine, ToolCall, ToolSpec};
use crate::error::{EngineError, EngineResult};
use crate::model::ModelIdentity;
use crate::record::{FunctionalScores, LanguageResult};

// ---------------------------------------------------------------------------
// Response checks
// ---------------------------------------------------------------------------

fn strip_code_fence(response: &str) -> &str {
    let s = response.trim();
    let s = s
        .strip_prefix("```json")
        .or_else(|| s.strip_prefix("```"))
        .unwrap_or(s);
    s.strip_suffix("```").unwrap_or(s).trim()
}

fn parse_json_response(response: &str) -> Option<Value> {
    serde_json::from_str(strip_code_fence(response)).ok()
}

pub fn reasoning_passed(response: &str, expected: &str) -> bool {
    response.trim().to_lowercase().contains(&expected.to_lowercase())
}

pub fn instruction_passed(response: &str, check: InstructionCheck) -> bool {
    match check {
        InstructionCheck::LineCount(n) => {
            response.lines().filter(|l| !l.trim().is_empty()).count() == n
        }
        InstructionCheck::Uppercase(word) => {
            let trimmed = response.trim();
            trimmed.to_uppercase().contains(word)
                && trimmed.chars().any(char::is_uppercase)
                && !trimmed.chars().any(char::is_lowercase)
        }
        InstructionCheck::JsonKeys(keys) => match parse_json_response(response) {
            Some(Value::Object(map)) => keys.iter().all(|k| map.contains_key(*k)),
            _ => false,
        },
        InstructionCheck::WordCount { target, tolerance } => {
            let n = response.split_whitespace().count();
            n + tolerance >= target && n <= target + tolerance
        }
    }
}

fn email_part_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.' || c == '-'
}

/// `local@domain.tld` with word characters, dots and dashes.
pub fn looks_like_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    let Some((host, tld)) = domain.rsplit_once('.') else {
        return false;
    };
    !local.is_empty()
        && local.chars().all(email_part_char)
        && !host.is_empty()
        && host.chars().all(email_part_char)
        && !tld.is_empty()
        && tld.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// Returns `(valid_json, schema_compliant)` for the person-object probe.
pub fn check_person_schema(response: &str) -> (bool, bool) {
    let Some(value) = parse_json_response(response) else {
        return (false, false);
    };
    let Value::Object(map) = value else {
        return (true, false);
    };
    if !PERSON_REQUIRED_KEYS.iter().all(|k| map.contains_key(*k)) {
        return (true, false);
    }
    let names_ok = map["firstName"].is_string() && map["lastName"].is_string();
    let age_ok = map["age"]
        .as_i64()
        .is_some_and(|a| (PERSON_AGE_RANGE.0..=PERSON_AGE_RANGE.1).contains(&a));
    let email_ok = map["email"].as_str().is_some_and(looks_like_email);
    let active_ok = map["active"].is_boolean();
    (true, names_ok && age_ok && email_ok && active_ok)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ToolCheck {
    pub detected: bool,
    pub function_correct: bool,
    pub params_correct: bool,
}

impl ToolCheck {
    /// Right function with the right arguments.
    pub fn passed(&self) -> bool {
        self.function_correct && self.params_correct
    }
}

pub fn check_tool_call(calls: &[ToolCall]) -> ToolCheck {
    let Some(call) = calls.first() else {
        return ToolCheck::default();
    };
    let args = match &call.arguments {
        Value::String(raw) => serde_json::from_str(raw).unwrap_or(Value::Null),
        other => other.clone(),
    };
    let params_correct = args
        .get("location")
        .and_then(Value::as_str)
        .is_some_and(|loc| loc.to_lowercase().contains(TOOL_EXPECTED_LOCATION));
    ToolCheck {
        detected: true,
        function_correct: call.name == TOOL_NAME,
        params_correct,
    }
}

fn strip_punctuation(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '_')
        .collect()
}

pub fn comprehension_passed(response: &str, expected: &[&str]) -> bool {
    let content = response.trim().to_lowercase();
    expected.iter().any(|e| content.contains(e))
}

/// A translated greeting is accepted when it matches a known form, or when it
/// is a non-empty answer that is not simply the English word echoed back.
pub fn greeting_passed(response: &str, expected: &[&str]) -> bool {
    let content = strip_punctuation(&response.trim().to_lowercase());
    if expected.iter().any(|e| content.contains(e)) {
        return true;
    }
    !content.trim().is_empty() && !content.contains("hello")
}

fn normalize(response: &str) -> String {
    response
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ProbeSettings {
    /// Battery repetitions; variance needs at least two.
    pub repeats: u32,
    pub context_window: u32,
    pub max_output_tokens: u32,
    pub timeout: Duration,
    /// Run the tool probes even when the model does not declare tool support.
    pub force_tools: bool,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            repeats: 2,
            context_window: 2048,
            max_output_tokens: 512,
            timeout: Duration::from_secs(120),
            force_tools: false,
        }
    }
}

struct ProbeSession<'a> {
    engine: &'a dyn InferenceEngine,
    model: &'a ModelIdentity,
    settings: &'a ProbeSettings,
}

impl ProbeSession<'_> {
    /// One probe call. Unreachability is the only error that escapes.
    fn ask(&self, prompt: &str, tools: &[ToolSpec]) -> EngineResult<Option<Generation>> {
        let request = GenerationRequest::new(self.model.clone(), prompt)
            .with_context(self.settings.context_window)
            .with_max_output(self.settings.max_output_tokens)
            .with_temperature(0.0)
            .with_tools(tools.to_vec())
            .with_timeout(self.settings.timeout);
        match self.engine.generate(&request) {
            Ok(g) => Ok(Some(g)),
            Err(e @ EngineError::Unreachable(_)) => Err(e),
            Err(e) => {
                debug!(model = %self.model.tag, error = %e, "probe call failed");
                Ok(None)
            }
        }
    }

    fn text(&self, prompt: &str) -> EngineResult<String> {
        Ok(self.ask(prompt, &[])?.map(|g| g.text).unwrap_or_default())
    }
}

#[derive(Default)]
struct Tally {
    passed: u32,
    total: u32,
}

impl Tally {
    fn add(&mut self, ok: bool) {
        self.total += 1;
        if ok {
            self.passed += 1;
        }
    }

    fn rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            let r = f64::from(self.passed) / f64::from(self.total);
            (r * 100.0).round() / 100.0
        }
    }
}

/// Run the whole battery `settings.repeats` times against one model.
pub fn run_battery(
    engine: &dyn InferenceEngine,
    model: &ModelIdentity,
    test_tools: bool,
    settings: &ProbeSettings,
) -> EngineResult<FunctionalScores> {
    let session = ProbeSession {
        engine,
        model,
        settings,
    };
    let repeats = settings.repeats.max(1);
    let test_tools = test_tools || settings.force_tools;
    let tools = [battery::weather_tool()];

    let mut reasoning = Tally::default();
    let mut instructions = Tally::default();
    let mut tool_success = Tally::default();
    let mut tool_restraint = Tally::default();
    let mut json_valid = Tally::default();
    let mut json_schema = Tally::default();
    let mut languages: BTreeMap<String, LanguageResult> = LANGUAGE_PROBES
        .iter()
        .map(|l| {
            (
                l.code.to_string(),
                LanguageResult {
                    comprehension: true,
                    generation: l.generation_prompt().is_some(),
                },
            )
        })
        .collect();
    let mut responses: HashMap<String, Vec<String>> = HashMap::new();
    let mut remember = |id: &str, text: &str| {
        responses
            .entry(id.to_string())
            .or_default()
            .push(normalize(text));
    };

    for round in 0..repeats {
        debug!(model = %model.tag, round, "functional battery round");

        for probe in &REASONING_PROBES {
            let text = session.text(probe.prompt)?;
            reasoning.add(reasoning_passed(&text, probe.expected));
            remember(probe.id, &text);
        }

        for probe in &INSTRUCTION_PROBES {
            let text = session.text(probe.prompt)?;
            instructions.add(instruction_passed(&text, probe.check));
            remember(probe.id, &text);
        }

        if test_tools {
            let calls = session
                .ask(TOOL_PROMPT, &tools)?
                .map(|g| g.tool_calls)
                .unwrap_or_default();
            tool_success.add(check_tool_call(&calls).passed());

            let restrained = session
                .ask(TOOL_RESTRAINT_PROMPT, &tools)?
                .is_some_and(|g| g.tool_calls.is_empty());
            tool_restraint.add(restrained);
        }

        let text = session.text(JSON_SCHEMA_PROMPT)?;
        let (valid, compliant) = check_person_schema(&text);
        json_valid.add(valid);
        json_schema.add(compliant);
        remember("json_schema", &text);

        // A language counts only when it passes in every round.
        for lang in &LANGUAGE_PROBES {
            let entry = languages.entry(lang.code.to_string()).or_default();
            let text = session.text(lang.comprehension_prompt)?;
            entry.comprehension &= comprehension_passed(&text, lang.comprehension_expected);
            if let Some(prompt) = lang.generation_prompt() {
                let text = session.text(&prompt)?;
                entry.generation &= greeting_passed(&text, lang.greeting_expected);
            }
        }
    }

    let response_variance = if repeats > 1 && !responses.is_empty() {
        let unstable = responses
            .values()
            .filter(|answers| answers.windows(2).any(|w| w[0] != w[1]))
            .count();
        ((unstable as f64 / responses.len() as f64) * 100.0).round() / 100.0
    } else {
        0.0
    };

    let scores = FunctionalScores {
        reasoning_avg: reasoning.rate(),
        instruction_following_avg: instructions.rate(),
        tools_tested: test_tools,
        tool_success_rate: tool_success.rate(),
        tool_restraint_rate: tool_restraint.rate(),
        json_valid_rate: json_valid.rate(),
        json_schema_compliance_rate: json_schema.rate(),
        response_variance,
        languages,
    };

    info!(
        model = %model.tag,
        reasoning = scores.reasoning_avg,
        instructions = scores.instruction_following_avg,
        tools = scores.tool_success_rate,
        json_schema = scores.json_schema_compliance_rate,
        languages = scores.languages_validated().len(),
        variance = scores.response_variance,
        "functional probes done"
    );
    Ok(scores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InstalledModel;
    use serde_json::json;
    use std::cell::Cell;

    #[test]
    fn test_reasoning_substring() {
        assert!(reasoning_passed("  Yes.", "yes"));
        assert!(reasoning_passed("The answer is 45", "45"));
        assert!(!reasoning_passed("44", "45"));
    }

    #[test]
    fn test_instruction_checks() {
        assert!(instruction_passed(
            "red\n\nblue\ngreen\n",
            InstructionCheck::LineCount(3)
        ));
        assert!(!instruction_passed("red\nblue", InstructionCheck::LineCount(3)));

        assert!(instruction_passed("HELLO", InstructionCheck::Uppercase("HELLO")));
        assert!(!instruction_passed("HELLO world", InstructionCheck::Uppercase("HELLO")));
        assert!(!instruction_passed("123", InstructionCheck::Uppercase("HELLO")));

        let keys = InstructionCheck::JsonKeys(&["name", "age"]);
        assert!(instruction_passed("```json\n{\"name\": \"Ada\", \"age\": 36}\n```", keys));
        assert!(!instruction_passed("{\"name\": \"Ada\"}", keys));
        assert!(!instruction_passed("name: Ada", keys));

        let words = InstructionCheck::WordCount {
            target: 10,
            tolerance: 2,
        };
        assert!(instruction_passed("one two three four five six seven eight", words));
        assert!(!instruction_passed("one two three four five six seven", words));
        assert!(!instruction_passed(&"w ".repeat(13), words));
    }

    #[test]
    fn test_person_schema() {
        let good = r#"{"firstName":"Ada","lastName":"Lovelace","age":36,"email":"ada@example.com","active":true}"#;
        assert_eq!(check_person_schema(good), (true, true));

        let old = good.replace("36", "130");
        assert_eq!(check_person_schema(&old), (true, false));

        let bad_mail = good.replace("ada@example.com", "ada.example.com");
        assert_eq!(check_person_schema(&bad_mail), (true, false));

        let float_age = good.replace("36", "36.5");
        assert_eq!(check_person_schema(&float_age), (true, false));

        assert_eq!(check_person_schema(r#"{"firstName":"Ada"}"#), (true, false));
        assert_eq!(check_person_schema("not json"), (false, false));
        assert_eq!(check_person_schema("[1,2]"), (true, false));
    }

    #[test]
    fn test_email_shape() {
        assert!(looks_like_email("first.last-1@mail.example.org"));
        assert!(!looks_like_email("@example.com"));
        assert!(!looks_like_email("a@b"));
        assert!(!looks_like_email("a b@c.d"));
        assert!(!looks_like_email("a@b."));
    }

    #[test]
    fn test_tool_call_check() {
        assert_eq!(check_tool_call(&[]), ToolCheck::default());

        let call = ToolCall {
            name: "get_weather".into(),
            arguments: json!({"location": "Paris, France"}),
        };
        let c = check_tool_call(&[call]);
        assert!(c.detected && c.function_correct && c.params_correct);
        assert!(c.passed());

        let stringly = ToolCall {
            name: "weather".into(),
            arguments: Value::String(r#"{"location":"paris"}"#.into()),
        };
        let c = check_tool_call(&[stringly]);
        assert!(c.detected && !c.function_correct && c.params_correct);
        assert!(!c.passed());
    }

    #[test]
    fn test_language_checks() {
        assert!(comprehension_passed("Bleu.", &["bleu"]));
        assert!(!comprehension_passed("blue", &["bleu"]));
        assert!(greeting_passed("Bonjour !", &["bonjour"]));
        assert!(greeting_passed("Moien", &["bonjour"]));
        assert!(!greeting_passed("Hello", &["bonjour"]));
        assert!(!greeting_passed("...", &["bonjour"]));
    }

    /// Answers every probe correctly, except that the arithmetic answer
    /// alternates between rounds.
    struct Oracle {
        calls: Cell<u32>,
        flip: Cell<bool>,
    }

    impl InferenceEngine for Oracle {
        fn list_models(&self) -> EngineResult<Vec<InstalledModel>> {
            Ok(Vec::new())
        }

        fn generate(&self, req: &GenerationRequest) -> EngineResult<Generation> {
            self.calls.set(self.calls.get() + 1);
            let p = req.prompt.as_str();
            let mut g = Generation::default();
            if !req.tools.is_empty() {
                if p == TOOL_PROMPT {
                    g.tool_calls.push(ToolCall {
                        name: "get_weather".into(),
                        arguments: json!({"location": "Paris"}),
                    });
                } else {
                    g.text = "Paris".into();
                }
                return Ok(g);
            }
            g.text = if let Some(probe) = REASONING_PROBES.iter().find(|r| r.prompt == p) {
                if probe.id == "arithmetic" {
                    self.flip.set(!self.flip.get());
                    let answer = if self.flip.get() { "45" } else { "45." };
                    answer.to_string()
                } else {
                    probe.expected.to_string()
                }
            } else if p.starts_with("List exactly 3") {
                "red\nblue\ngreen".into()
            } else if p.starts_with("Write the word") {
                "HELLO".into()
            } else if p.starts_with("Return a valid JSON") {
                r#"{"name":"a","age":1}"#.into()
            } else if p.starts_with("Describe the sun") {
                "a b c d e f g h i j".into()
            } else if p == JSON_SCHEMA_PROMPT {
                r#"{"firstName":"A","lastName":"B","age":3,"email":"a@b.co","active":false}"#.into()
            } else if p.contains("French") {
                "Bonjour".into()
            } else if p.starts_with("Translate") {
                "Hello".into()
            } else if p.starts_with("De quelle couleur") {
                "bleu".into()
            } else if p.starts_with("What color") {
                "blue".into()
            } else {
                "?".into()
            };
            Ok(g)
        }

        fn unload(&self, _: &ModelIdentity) -> EngineResult<()> {
            Ok(())
        }

        fn license_text(&self, _: &ModelIdentity) -> EngineResult<Option<String>> {
            Ok(None)
        }
    }

    #[test]
    fn test_battery_scores_and_variance() {
        let engine = Oracle {
            calls: Cell::new(0),
            flip: Cell::new(false),
        };
        let model = ModelIdentity::new("m", "m:1b");
        let scores = run_battery(&engine, &model, true, &ProbeSettings::default()).unwrap();

        assert_eq!(scores.reasoning_avg, 1.0);
        assert_eq!(scores.instruction_following_avg, 1.0);
        assert!(scores.tools_tested);
        assert_eq!(scores.tool_success_rate, 1.0);
        assert_eq!(scores.tool_restraint_rate, 1.0);
        assert_eq!(scores.json_valid_rate, 1.0);
        assert_eq!(scores.json_schema_compliance_rate, 1.0);
        // 1 unstable probe out of 5 reasoning + 4 instruction + 1 json.
        assert_eq!(scores.response_variance, 0.1);
        assert_eq!(
            scores.languages_validated(),
            vec!["en".to_string(), "fr".to_string()]
        );
        assert!(!scores.languages["en"].generation);
    }

    #[test]
    fn test_battery_skips_tools_when_not_declared() {
        let engine = Oracle {
            calls: Cell::new(0),
            flip: Cell::new(false),
        };
        let model = ModelIdentity::new("m", "m:1b");
        let settings = ProbeSettings {
            repeats: 1,
            ..Default::default()
        };
        let scores = run_battery(&engine, &model, false, &settings).unwrap();
        assert!(!scores.tools_tested);
        assert_eq!(scores.tool_success_rate, 0.0);
        assert_eq!(scores.response_variance, 0.0);
        // 5 + 4 + 1 + 11 comprehension + 10 translations
        assert_eq!(engine.calls.get(), 31);
    }

    /// Extracts the right location but calls the wrong function.
    struct MisnamedTool(Oracle);

    impl InferenceEngine for MisnamedTool {
        fn list_models(&self) -> EngineResult<Vec<InstalledModel>> {
            self.0.list_models()
        }
        fn generate(&self, req: &GenerationRequest) -> EngineResult<Generation> {
            let mut g = self.0.generate(req)?;
            for call in &mut g.tool_calls {
                call.name = "lookup_forecast".into();
            }
            Ok(g)
        }
        fn unload(&self, m: &ModelIdentity) -> EngineResult<()> {
            self.0.unload(m)
        }
        fn license_text(&self, m: &ModelIdentity) -> EngineResult<Option<String>> {
            self.0.license_text(m)
        }
    }

    #[test]
    fn test_wrong_function_name_fails_tool_call() {
        let engine = MisnamedTool(Oracle {
            calls: Cell::new(0),
            flip: Cell::new(false),
        });
        let model = ModelIdentity::new("m", "m:1b");
        let settings = ProbeSettings {
            repeats: 1,
            ..Default::default()
        };
        let scores = run_battery(&engine, &model, true, &settings).unwrap();
        assert!(scores.tools_tested);
        assert_eq!(scores.tool_success_rate, 0.0);
        assert_eq!(scores.tool_restraint_rate, 1.0);
    }

    struct Down;

    impl InferenceEngine for Down {
        fn list_models(&self) -> EngineResult<Vec<InstalledModel>> {
            Err(EngineError::Unreachable("refused".into()))
        }
        fn generate(&self, _: &GenerationRequest) -> EngineResult<Generation> {
            Err(EngineError::Unreachable("refused".into()))
        }
        fn unload(&self, _: &ModelIdentity) -> EngineResult<()> {
            Ok(())
        }
        fn license_text(&self, _: &ModelIdentity) -> EngineResult<Option<String>> {
            Ok(None)
        }
    }

    struct Broken;

    impl InferenceEngine for Broken {
        fn list_models(&self) -> EngineResult<Vec<InstalledModel>> {
            Ok(Vec::new())
        }
        fn generate(&self, _: &GenerationRequest) -> EngineResult<Generation> {
            Err(EngineError::Rejected("model crashed".into()))
        }
        fn unload(&self, _: &ModelIdentity) -> EngineResult<()> {
            Ok(())
        }
        fn license_text(&self, _: &ModelIdentity) -> EngineResult<Option<String>> {
            Ok(None)
        }
    }

    #[test]
    fn test_unreachable_aborts_but_failures_are_scores() {
        let model = ModelIdentity::new("m", "m:1b");
        let settings = ProbeSettings::default();
        assert!(matches!(
            run_battery(&Down, &model, true, &settings),
            Err(EngineError::Unreachable(_))
        ));

        let scores = run_battery(&Broken, &model, true, &settings).unwrap();
        assert_eq!(scores.reasoning_avg, 0.0);
        assert_eq!(scores.tool_restraint_rate, 0.0);
        assert!(scores.languages_validated().is_empty());
    }
}
