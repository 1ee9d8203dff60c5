//! # Formula Template and Assembler
//!
//! A model formula is held as a typed value — an outcome, a list of fixed
//! terms, and optional random-effects grouping blocks — with an explicit
//! placeholder marker where the dynamically sized biomarker term list is
//! spliced in. Assembly is a pure structural substitution; turning the
//! result into text, including delimiting of term names that contain
//! punctuation, happens only in the rendering step so that engine-specific
//! escaping never leaks into the data model.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// The placeholder token recognized by default when parsing templates.
pub const DEFAULT_PLACEHOLDER: &str = "__BIOMARKERS__";

/// One term on the right-hand side of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    /// An ordinary covariate, stored verbatim (no quoting).
    Covariate(String),
    /// The marker replaced by the biomarker term list at assembly time.
    Placeholder,
}

/// A random-effects block of the shape `(terms | grouping variable)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupBlock {
    pub terms: Vec<Term>,
    pub grouping: String,
}

/// A parsed model-formula template: `outcome ~ fixed terms + grouping
/// blocks`, with the placeholder allowed anywhere a term is allowed —
/// including inside grouping blocks, which is what supports per-group
/// random slopes over the biomarker set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormulaTemplate {
    outcome: String,
    fixed: Vec<Term>,
    groups: Vec<GroupBlock>,
}

/// What `assemble` does when the biomarker term list is empty. There is no
/// universally right answer, so the caller must choose explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmptyTermPolicy {
    /// Refuse to assemble; surfaces the misconfiguration before any
    /// expensive model fitting starts.
    Fail,
    /// Remove the placeholder everywhere. A grouping block that contained
    /// nothing but the placeholder is dropped entirely; one that retains
    /// fixed terms is kept.
    DropPlaceholder,
}

/// Identifier delimiting convention of the target model-fitting engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentifierQuoting {
    /// `` `name` `` with embedded backticks backslash-escaped.
    Backtick,
    /// `[name]` with embedded `]` doubled.
    Bracket,
}

#[derive(Error, Debug)]
pub enum FormulaError {
    #[error("The formula '{0}' has no outcome. Expected the shape 'outcome ~ terms'.")]
    MissingOutcome(String),
    #[error("The formula '{0}' has more than one '~'.")]
    ExtraTilde(String),
    #[error("Unbalanced parentheses in the formula term list.")]
    UnbalancedParentheses,
    #[error("Empty term in the formula term list. Check for a stray '+' or '|'.")]
    EmptyTerm,
    #[error("Malformed grouping block '({0})'. Expected the shape '(terms | grouping variable)'.")]
    MalformedGroupBlock(String),
    #[error(
        "The template contains no placeholder, but {0} biomarker terms were supplied. Add the placeholder token where the biomarker terms belong."
    )]
    PlaceholderNotFound(usize),
    #[error(
        "The biomarker term list is empty and the empty-term policy is Fail. Supply at least one biomarker or switch to the DropPlaceholder policy."
    )]
    EmptyTermList,
}

impl FormulaTemplate {
    /// Parses `outcome ~ t1 + t2 + (g1 + g2 | group)` text. A term exactly
    /// equal to `placeholder` becomes the marker; everything else is kept
    /// verbatim.
    pub fn parse(src: &str, placeholder: &str) -> Result<Self, FormulaError> {
        let Some((lhs, rhs)) = src.split_once('~') else {
            return Err(FormulaError::MissingOutcome(src.to_string()));
        };
        if rhs.contains('~') {
            return Err(FormulaError::ExtraTilde(src.to_string()));
        }
        let outcome = lhs.trim();
        if outcome.is_empty() {
            return Err(FormulaError::MissingOutcome(src.to_string()));
        }

        let mut fixed = Vec::new();
        let mut groups = Vec::new();
        for chunk in split_top_level(rhs, '+')? {
            let chunk = chunk.trim();
            if chunk.is_empty() {
                return Err(FormulaError::EmptyTerm);
            }
            if let Some(inner) = chunk.strip_prefix('(') {
                let Some(inner) = inner.strip_suffix(')') else {
                    return Err(FormulaError::MalformedGroupBlock(chunk.to_string()));
                };
                groups.push(parse_group_block(inner, placeholder)?);
            } else {
                fixed.push(parse_term(chunk, placeholder)?);
            }
        }

        Ok(Self {
            outcome: outcome.to_string(),
            fixed,
            groups,
        })
    }

    pub fn outcome(&self) -> &str {
        &self.outcome
    }

    /// True if the placeholder occurs anywhere, fixed terms or grouping
    /// blocks included.
    pub fn has_placeholder(&self) -> bool {
        self.fixed.contains(&Term::Placeholder)
            || self
                .groups
                .iter()
                .any(|block| block.terms.contains(&Term::Placeholder))
    }

    /// Substitutes the biomarker term list at every placeholder occurrence
    /// and returns the immutable assembled formula.
    ///
    /// `biomarker_terms` should be in matrix column order so the assembled
    /// term list is reproducible run to run.
    pub fn assemble(
        &self,
        biomarker_terms: &[String],
        empty_policy: EmptyTermPolicy,
    ) -> Result<AssembledFormula, FormulaError> {
        if biomarker_terms.is_empty() {
            if empty_policy == EmptyTermPolicy::Fail {
                return Err(FormulaError::EmptyTermList);
            }
        } else if !self.has_placeholder() {
            return Err(FormulaError::PlaceholderNotFound(biomarker_terms.len()));
        }

        let fixed = substitute(&self.fixed, biomarker_terms);
        let mut groups = Vec::new();
        for block in &self.groups {
            let terms = substitute(&block.terms, biomarker_terms);
            // Empty only when the block held just the placeholder and the
            // term list is empty under DropPlaceholder.
            if terms.is_empty() {
                continue;
            }
            groups.push((terms, block.grouping.clone()));
        }

        Ok(AssembledFormula {
            outcome: self.outcome.clone(),
            fixed,
            groups,
        })
    }
}

/// A fully substituted formula, ready for rendering. Immutable once
/// produced; term names are stored raw and only delimited when rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledFormula {
    outcome: String,
    fixed: Vec<String>,
    groups: Vec<(Vec<String>, String)>,
}

impl AssembledFormula {
    pub fn outcome(&self) -> &str {
        &self.outcome
    }

    pub fn fixed_terms(&self) -> &[String] {
        &self.fixed
    }

    pub fn group_blocks(&self) -> &[(Vec<String>, String)] {
        &self.groups
    }

    /// Every covariate term once, in formula order (fixed terms, then
    /// grouping-block terms). Grouping variables are not covariates and are
    /// excluded.
    pub fn covariate_names(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        let mut names = Vec::new();
        let group_terms = self.groups.iter().flat_map(|(terms, _)| terms);
        for term in self.fixed.iter().chain(group_terms) {
            if !is_intercept_literal(term) && seen.insert(term.as_str()) {
                names.push(term.as_str());
            }
        }
        names
    }

    /// Renders the formula in the target engine's syntax. Delimiting of
    /// non-identifier names happens here and nowhere else.
    pub fn render(&self, quoting: IdentifierQuoting) -> String {
        let mut pieces: Vec<String> = self
            .fixed
            .iter()
            .map(|term| quote_term(term, quoting))
            .collect();
        if pieces.is_empty() && self.groups.is_empty() {
            // A formula needs some right-hand side; fall back to the
            // intercept-only model.
            pieces.push("1".to_string());
        }
        for (terms, grouping) in &self.groups {
            let inner = terms.iter().map(|term| quote_term(term, quoting)).join(" + ");
            pieces.push(format!("({inner} | {})", quote_term(grouping, quoting)));
        }
        format!(
            "{} ~ {}",
            quote_term(&self.outcome, quoting),
            pieces.iter().join(" + ")
        )
    }
}

impl fmt::Display for AssembledFormula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render(IdentifierQuoting::Backtick))
    }
}

fn parse_term(src: &str, placeholder: &str) -> Result<Term, FormulaError> {
    let name = src.trim();
    if name.is_empty() {
        return Err(FormulaError::EmptyTerm);
    }
    if name == placeholder {
        Ok(Term::Placeholder)
    } else {
        Ok(Term::Covariate(name.to_string()))
    }
}

fn parse_group_block(inner: &str, placeholder: &str) -> Result<GroupBlock, FormulaError> {
    let parts = split_top_level(inner, '|')?;
    let [terms_src, grouping] = parts.as_slice() else {
        return Err(FormulaError::MalformedGroupBlock(inner.to_string()));
    };
    let grouping = grouping.trim();
    if grouping.is_empty() {
        return Err(FormulaError::MalformedGroupBlock(inner.to_string()));
    }
    let mut terms = Vec::new();
    for chunk in split_top_level(terms_src, '+')? {
        terms.push(parse_term(chunk, placeholder)?);
    }
    Ok(GroupBlock {
        terms,
        grouping: grouping.to_string(),
    })
}

/// Splits on `sep` while ignoring separators nested inside parentheses.
fn split_top_level(src: &str, sep: char) -> Result<Vec<&str>, FormulaError> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in src.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or(FormulaError::UnbalancedParentheses)?;
            }
            c if c == sep && depth == 0 => {
                parts.push(&src[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(FormulaError::UnbalancedParentheses);
    }
    parts.push(&src[start..]);
    Ok(parts)
}

fn substitute(terms: &[Term], biomarker_terms: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    for term in terms {
        match term {
            Term::Covariate(name) => out.push(name.clone()),
            Term::Placeholder => out.extend(biomarker_terms.iter().cloned()),
        }
    }
    out
}

/// The intercept markers `1` and `0` are formula syntax, not identifiers,
/// and must never be delimited.
fn is_intercept_literal(name: &str) -> bool {
    name == "1" || name == "0"
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_alphabetic() || first == '.' || first == '_') {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_')
}

fn quote_term(name: &str, quoting: IdentifierQuoting) -> String {
    if is_plain_identifier(name) || is_intercept_literal(name) {
        return name.to_string();
    }
    match quoting {
        IdentifierQuoting::Backtick => format!("`{}`", name.replace('`', "\\`")),
        IdentifierQuoting::Bracket => format!("[{}]", name.replace(']', "]]")),
    }
}

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::*;

    fn terms(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn parse(src: &str) -> FormulaTemplate {
        FormulaTemplate::parse(src, DEFAULT_PLACEHOLDER).unwrap()
    }

    #[test]
    fn substitutes_terms_additively_with_delimiting() {
        let template = parse("relapse ~ age + __BIOMARKERS__");
        let formula = template
            .assemble(&terms(&["g.A", "g.B"]), EmptyTermPolicy::Fail)
            .unwrap();
        // Dotted names are plain identifiers in the target syntax.
        assert_eq!(
            formula.render(IdentifierQuoting::Backtick),
            "relapse ~ age + g.A + g.B"
        );
    }

    #[test]
    fn punctuated_names_are_backtick_delimited() {
        let template = parse("relapse ~ age + __BIOMARKERS__");
        let formula = template
            .assemble(
                &terms(&["TP53 p.R175H (missense)", "KRAS"]),
                EmptyTermPolicy::Fail,
            )
            .unwrap();
        assert_eq!(
            formula.to_string(),
            "relapse ~ age + `TP53 p.R175H (missense)` + KRAS"
        );
    }

    #[test]
    fn bracket_quoting_doubles_closing_brackets() {
        let template = parse("y ~ __BIOMARKERS__");
        let formula = template
            .assemble(&terms(&["del[17p]"]), EmptyTermPolicy::Fail)
            .unwrap();
        assert_eq!(
            formula.render(IdentifierQuoting::Bracket),
            "y ~ [del[17p]]]"
        );
    }

    #[test]
    fn placeholder_inside_grouping_block_is_substituted() {
        let template = parse("y ~ age + __BIOMARKERS__ + (1 + __BIOMARKERS__ | cohort)");
        let formula = template
            .assemble(&terms(&["TP53"]), EmptyTermPolicy::Fail)
            .unwrap();
        assert_eq!(
            formula.to_string(),
            "y ~ age + TP53 + (1 + TP53 | cohort)"
        );
    }

    #[test]
    fn missing_placeholder_with_terms_is_an_error() {
        let template = parse("y ~ age + sex");
        let err = template
            .assemble(&terms(&["TP53"]), EmptyTermPolicy::Fail)
            .unwrap_err();
        assert!(matches!(err, FormulaError::PlaceholderNotFound(1)));
    }

    #[test]
    fn empty_terms_fail_under_fail_policy() {
        let template = parse("y ~ age + __BIOMARKERS__");
        let err = template.assemble(&[], EmptyTermPolicy::Fail).unwrap_err();
        assert!(matches!(err, FormulaError::EmptyTermList));
    }

    #[test]
    fn empty_terms_drop_placeholder_but_keep_mixed_blocks() {
        let template =
            parse("y ~ age + __BIOMARKERS__ + (__BIOMARKERS__ | cohort) + (1 + __BIOMARKERS__ | site)");
        let formula = template
            .assemble(&[], EmptyTermPolicy::DropPlaceholder)
            .unwrap();
        // The placeholder-only cohort block disappears; the site block keeps
        // its intercept term.
        assert_eq!(formula.to_string(), "y ~ age + (1 | site)");
    }

    #[test]
    fn empty_terms_and_no_fixed_terms_render_an_intercept_model() {
        let template = parse("y ~ __BIOMARKERS__");
        let formula = template
            .assemble(&[], EmptyTermPolicy::DropPlaceholder)
            .unwrap();
        assert_eq!(formula.to_string(), "y ~ 1");
    }

    #[test]
    fn covariate_names_list_every_term_once_in_order() {
        let template = parse("y ~ age + __BIOMARKERS__ + (age + __BIOMARKERS__ | cohort)");
        let formula = template
            .assemble(&terms(&["TP53", "KRAS"]), EmptyTermPolicy::Fail)
            .unwrap();
        assert_eq!(formula.covariate_names(), ["age", "TP53", "KRAS"]);
    }

    #[test]
    fn custom_placeholder_token_is_honored() {
        let template = FormulaTemplate::parse("y ~ x + GENES", "GENES").unwrap();
        assert!(template.has_placeholder());
        let formula = template
            .assemble(&terms(&["TP53"]), EmptyTermPolicy::Fail)
            .unwrap();
        assert_eq!(formula.to_string(), "y ~ x + TP53");
    }

    #[test]
    fn parse_rejects_missing_outcome() {
        let err = FormulaTemplate::parse(" ~ x", DEFAULT_PLACEHOLDER).unwrap_err();
        assert!(matches!(err, FormulaError::MissingOutcome(_)));
        let err = FormulaTemplate::parse("y + x", DEFAULT_PLACEHOLDER).unwrap_err();
        assert!(matches!(err, FormulaError::MissingOutcome(_)));
    }

    #[test]
    fn parse_rejects_unbalanced_parentheses() {
        let err = FormulaTemplate::parse("y ~ (1 | cohort", DEFAULT_PLACEHOLDER).unwrap_err();
        assert!(matches!(err, FormulaError::UnbalancedParentheses));
    }

    #[test]
    fn parse_rejects_group_block_without_grouping_variable() {
        let err = FormulaTemplate::parse("y ~ (age + sex)", DEFAULT_PLACEHOLDER).unwrap_err();
        assert!(matches!(err, FormulaError::MalformedGroupBlock(_)));
        let err = FormulaTemplate::parse("y ~ (age | )", DEFAULT_PLACEHOLDER).unwrap_err();
        assert!(matches!(err, FormulaError::MalformedGroupBlock(_)));
    }

    #[test]
    fn parse_rejects_stray_plus() {
        let err = FormulaTemplate::parse("y ~ age + + sex", DEFAULT_PLACEHOLDER).unwrap_err();
        assert!(matches!(err, FormulaError::EmptyTerm));
    }

    #[test]
    fn quoted_outcome_and_grouping_variable() {
        let template = FormulaTemplate::parse(
            "time to event ~ __BIOMARKERS__ + (1 | study site)",
            DEFAULT_PLACEHOLDER,
        )
        .unwrap();
        let formula = template
            .assemble(&terms(&["KRAS"]), EmptyTermPolicy::Fail)
            .unwrap();
        assert_eq!(
            formula.to_string(),
            "`time to event` ~ KRAS + (1 | `study site`)"
        );
    }
}
