//! Response body rewriting
//!
//! Bodies go through three stages, always in this order:
//! 1. literal replace rules, folded in configured order
//! 2. `<domain>/` becomes `/`, so primary links resolve against the proxy
//! 3. every secondary domain becomes a link to the external mirroring path
//!
//! All stages are plain byte replacements. Bodies do not need to be UTF-8.

use crate::config::{ReplaceRule, TargetConfig};
use aho_corasick::{AhoCorasick, BuildError, MatchKind};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Reserved route mirroring an arbitrary URL
pub const EXTERNAL_PATH: &str = "/_EXTERNAL_";

/// Query parameter carrying the destination of the external route
pub const EXTERNAL_URL_PARAM: &str = "EXTERNAL_URL";

#[derive(Debug)]
struct CompiledRule {
    matcher: AhoCorasick,
    replacement: Vec<u8>,
}

impl CompiledRule {
    fn new(needle: &[u8], replacement: &[u8]) -> Result<Self, BuildError> {
        let matcher = AhoCorasick::builder()
            .match_kind(MatchKind::LeftmostFirst)
            .build([needle])?;

        Ok(Self {
            matcher,
            replacement: replacement.to_vec(),
        })
    }

    /// Replace every non-overlapping occurrence, leftmost first.
    /// Returns the input untouched when nothing matches.
    fn apply(&self, body: Bytes) -> Bytes {
        if !self.matcher.is_match(body.as_ref()) {
            return body;
        }
        Bytes::from(self.matcher.replace_all_bytes(body.as_ref(), &[&self.replacement]))
    }
}

/// Domain stages compiled for one target
#[derive(Debug)]
pub struct TargetRewrite {
    primary: Option<CompiledRule>,
    secondary: Vec<CompiledRule>,
}

impl TargetRewrite {
    /// Empty domains are skipped.
    pub fn compile(target: &TargetConfig) -> Result<Self, BuildError> {
        let primary = if target.domain.is_empty() {
            None
        } else {
            Some(CompiledRule::new(format!("{}/", target.domain).as_bytes(), b"/")?)
        };

        let secondary = target
            .secondary_domains
            .iter()
            .filter(|domain| !domain.is_empty())
            .map(|domain| CompiledRule::new(domain.as_bytes(), external_link(domain).as_bytes()))
            .collect::<Result<Vec<_>, BuildError>>()?;

        Ok(Self { primary, secondary })
    }

    /// Stage 2: `<domain>/` -> `/`
    pub fn relativize_primary_domain(&self, body: Bytes) -> Bytes {
        match &self.primary {
            Some(rule) => rule.apply(body),
            None => body,
        }
    }

    /// Stage 3: `<d>` -> `/_EXTERNAL_?EXTERNAL_URL=<d>` for every secondary domain
    pub fn redirect_secondary_domains(&self, body: Bytes) -> Bytes {
        self.secondary.iter().fold(body, |body, rule| rule.apply(body))
    }
}

/// Applies the rewrite stages with a fixed set of replace rules and the
/// domain stages of every target it was built with
#[derive(Debug, Clone)]
pub struct BodyRewriter {
    rules: Arc<[CompiledRule]>,
    targets: Arc<HashMap<TargetConfig, TargetRewrite>>,
}

impl BodyRewriter {
    /// Compile the replace rules and the domain stages of `targets`.
    /// Rules with an empty `old` are ignored.
    pub fn new<'a>(
        rules: &[ReplaceRule],
        targets: impl IntoIterator<Item = &'a TargetConfig>,
    ) -> Result<Self, BuildError> {
        let compiled = rules
            .iter()
            .filter(|rule| !rule.old.is_empty())
            .map(|rule| CompiledRule::new(rule.old.as_bytes(), rule.new.as_bytes()))
            .collect::<Result<Vec<_>, BuildError>>()?;

        let mut stages = HashMap::new();
        for target in targets {
            if !stages.contains_key(target) {
                stages.insert(target.clone(), TargetRewrite::compile(target)?);
            }
        }

        Ok(Self {
            rules: compiled.into(),
            targets: Arc::new(stages),
        })
    }

    /// Run the whole pipeline for one target. A target the rewriter was not
    /// built with gets the literal stage only.
    pub fn rewrite(&self, body: Bytes, target: &TargetConfig) -> Bytes {
        let body = self.apply_replace_rules(body);

        match self.targets.get(target) {
            Some(stages) => {
                let body = stages.relativize_primary_domain(body);
                stages.redirect_secondary_domains(body)
            }
            None => {
                debug!(domain = %target.domain, "No domain rewrite compiled for target");
                body
            }
        }
    }

    /// Stage 1. A later rule sees the output of earlier ones.
    pub fn apply_replace_rules(&self, body: Bytes) -> Bytes {
        self.rules.iter().fold(body, |body, rule| rule.apply(body))
    }
}

/// Proxy-relative link that mirrors `destination` through the external path
pub fn external_link(destination: &str) -> String {
    format!("{}?{}={}", EXTERNAL_PATH, EXTERNAL_URL_PARAM, destination)
}
