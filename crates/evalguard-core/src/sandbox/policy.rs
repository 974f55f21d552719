//! Denylist rules and the security policy that holds them.

use regex::Regex;

use crate::config::{ConfigError, PolicyConfig};

use super::capability::Capability;
use super::engine::validate_expression;
use super::error::PolicyDenial;
use super::request::PolicyVerdict;

/// Built-in denylist: `(category, pattern, reason)`.
const BUILTIN_RULES: &[(Capability, &str, &str)] = &[
    (
        Capability::ProcessControl,
        r"\b(Runtime|ProcessBuilder|ProcessHandle|ProcessImpl)\b",
        "process control types are not reachable",
    ),
    (
        Capability::ProcessControl,
        r"\b(exec|spawn|fork|system|halt|exit)\s*\(",
        "process execution or termination call",
    ),
    (
        Capability::ProcessControl,
        r"\bSystem\s*\.\s*(exit|getenv|setProperty|setSecurityManager)\b",
        "process environment access",
    ),
    (
        Capability::ProcessControl,
        r"(?i)(/bin/(ba|z)?sh|cmd\.exe|powershell)",
        "shell invocation",
    ),
    (
        Capability::Reflection,
        r"\bT\s*\(",
        "type references are not supported",
    ),
    (
        Capability::Reflection,
        r"\bnew\s+[A-Za-z_]",
        "object construction is not supported",
    ),
    (
        Capability::Reflection,
        r"\b(getClass|forName|loadClass|defineClass|newInstance|getDeclared\w*|getMethods?|getFields?|getConstructors?|setAccessible|invoke|ClassLoader|MethodHandles?)\b",
        "reflective type or method access",
    ),
    (
        Capability::Reflection,
        r"\.\s*class\b",
        "class literal access",
    ),
    (
        Capability::FileIo,
        r"\b(java\.io|java\.nio|File|Files|Paths?|FileInputStream|FileOutputStream|FileReader|FileWriter|RandomAccessFile|FileChannel)\b",
        "raw file access",
    ),
    (
        Capability::FileIo,
        r"\b(readAllBytes|readAllLines|readString|writeString|newBufferedReader|newBufferedWriter|getResourceAsStream|openStream|openConnection)\b",
        "raw stream access",
    ),
    (
        Capability::FileIo,
        r"\b(Socket|ServerSocket|URLConnection|HttpClient|DatagramSocket)\b",
        "raw network access",
    ),
    (
        Capability::ScriptEngine,
        r"\b(ScriptEngine|ScriptEngineManager|Nashorn|GraalJS|GroovyShell|Jython|JShell|ExpressionParser|SpelExpressionParser|Interpreter)\b",
        "alternate scripting engine",
    ),
    (
        Capability::ScriptEngine,
        r"\b(eval|evaluate|compile|parseExpression)\s*\(",
        "nested evaluation",
    ),
    (
        Capability::NativeMemory,
        r"\b(Unsafe|theUnsafe|sun\.misc|jdk\.internal|MemorySegment|MemoryAddress|allocateDirect|allocateMemory|putAddress|getAddress)\b",
        "unsafe or native memory access",
    ),
    (
        Capability::NativeMemory,
        r"\bSystem\s*\.\s*(load|loadLibrary|mapLibraryName)\b",
        "native library loading",
    ),
];

/// Metadata access refused in sandbox mode.
const ANNOTATION_METHODS: &str =
    r"\b(getAnnotations?|getDeclaredAnnotations?|getAnnotationsByType|isAnnotationPresent|annotations)\b";

/// `@Name` or `@qualified.Name`.
const ANNOTATION_USE: &str = r"@\s*([A-Za-z_][A-Za-z0-9_.]*)";

/// A single denylist rule.
#[derive(Debug, Clone)]
pub struct DenyRule {
    pub category: Capability,
    pub reason: String,
    regex: Regex,
}

impl DenyRule {
    pub fn new(
        category: Capability,
        pattern: &str,
        reason: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let regex = Regex::new(pattern).map_err(|source| ConfigError::Pattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            category,
            reason: reason.into(),
            regex,
        })
    }

    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    /// Returns `true` if this rule matches anywhere in `expr`.
    pub fn matches(&self, expr: &str) -> bool {
        self.regex.is_match(expr)
    }

    /// The verdict this rule produces when it matches.
    pub fn verdict(&self) -> PolicyVerdict {
        PolicyVerdict::Denied {
            category: self.category.clone(),
            reason: self.reason.clone(),
        }
    }
}

/// An ordered denylist plus the length and sandbox-mode settings.
///
/// Rules are checked in order and the first match wins.
#[derive(Debug, Clone)]
pub struct SecurityPolicy {
    pub max_length: usize,
    pub sandbox_mode: bool,
    pub rules: Vec<DenyRule>,
    pub allowed_annotations: Vec<String>,
    pub(crate) annotation_methods: Regex,
    pub(crate) annotation_use: Regex,
}

impl SecurityPolicy {
    /// The built-in denylist with default limits and sandbox mode on.
    pub fn standard() -> Result<Self, ConfigError> {
        Self::from_config(&PolicyConfig::default())
    }

    pub fn from_config(config: &PolicyConfig) -> Result<Self, ConfigError> {
        let mut rules = Vec::with_capacity(BUILTIN_RULES.len() + config.extra_denied_patterns.len());
        for (category, pattern, reason) in BUILTIN_RULES {
            rules.push(DenyRule::new(category.clone(), pattern, *reason)?);
        }
        for pattern in &config.extra_denied_patterns {
            rules.push(DenyRule::new(
                Capability::Custom("configured".to_string()),
                pattern,
                format!("matches configured pattern '{pattern}'"),
            )?);
        }
        Ok(Self {
            max_length: config.max_expression_length,
            sandbox_mode: config.sandbox_mode,
            rules,
            allowed_annotations: config.allowed_annotations.clone(),
            annotation_methods: compile_builtin(ANNOTATION_METHODS)?,
            annotation_use: compile_builtin(ANNOTATION_USE)?,
        })
    }

    /// Append a rule and return `self` (builder pattern).
    pub fn with_rule(mut self, rule: DenyRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn with_sandbox_mode(mut self, on: bool) -> Self {
        self.sandbox_mode = on;
        self
    }

    pub fn allow_annotation(mut self, name: impl Into<String>) -> Self {
        self.allowed_annotations.push(name.into());
        self
    }

    /// Check `expr` without side effects.
    pub fn validate(&self, expr: &str) -> Result<(), PolicyDenial> {
        match validate_expression(self, expr) {
            PolicyVerdict::Allowed => Ok(()),
            PolicyVerdict::Denied { category, reason } => Err(PolicyDenial { category, reason }),
        }
    }
}

fn compile_builtin(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|source| ConfigError::Pattern {
        pattern: pattern.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_rules_compile() {
        let policy = SecurityPolicy::standard().unwrap();
        assert_eq!(policy.rules.len(), BUILTIN_RULES.len());
        assert_eq!(policy.max_length, 1000);
        assert!(policy.sandbox_mode);
    }

    #[test]
    fn test_rule_matches_and_verdict() {
        let rule = DenyRule::new(Capability::FileIo, r"\bFiles\b", "no files").unwrap();
        assert!(rule.matches("Files.readString(p)"));
        assert!(!rule.matches("profiles.size()"));
        match rule.verdict() {
            PolicyVerdict::Denied { category, reason } => {
                assert_eq!(category, Capability::FileIo);
                assert_eq!(reason, "no files");
            }
            other => panic!("expected Denied, got {:?}", other),
        }
    }

    #[test]
    fn test_extra_patterns_are_appended() {
        let config = PolicyConfig {
            extra_denied_patterns: vec![r"\bjndi\b".to_string()],
            ..PolicyConfig::default()
        };
        let policy = SecurityPolicy::from_config(&config).unwrap();
        let denial = policy.validate("properties.get('jndi')").unwrap_err();
        assert_eq!(denial.category, Capability::Custom("configured".into()));
    }

    #[test]
    fn test_invalid_rule_pattern() {
        assert!(matches!(
            DenyRule::new(Capability::Reflection, "(", "bad"),
            Err(ConfigError::Pattern { .. })
        ));
    }

    #[test]
    fn test_with_rule_appends() {
        let policy = SecurityPolicy::standard()
            .unwrap()
            .with_rule(DenyRule::new(Capability::Custom("x".into()), "xyz", "x").unwrap());
        assert_eq!(policy.rules.len(), BUILTIN_RULES.len() + 1);
        assert!(policy.validate("'xyz'").is_err());
    }
}
