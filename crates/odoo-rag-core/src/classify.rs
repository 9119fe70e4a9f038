//! Rule-based query intent classification.
//!
//! Each intent has a keyword set. A keyword ending in `*` matches any word
//! with that prefix; a keyword containing a space matches that phrase. The
//! intent with the most distinct matching keywords wins, and a tie (or no
//! match at all) yields [`QueryIntent::Generic`].

use crate::models::QueryIntent;

const DEFINITION: &[&str] = &[
    "what is",
    "what's",
    "define",
    "definition",
    "describe",
    "declar*",
    "purpose",
    "meaning",
    "explain",
];

const FIELD: &[&str] = &[
    "field*",
    "column*",
    "attribute*",
    "comput*",
    "track*",
    "many2one",
    "one2many",
    "many2many",
    "related",
    "selection",
    "required",
    "readonly",
    "default*",
];

const INHERITANCE: &[&str] = &[
    "inherit*",
    "extend*",
    "extension*",
    "overrid*",
    "customi*",
    "xpath",
    "parent*",
    "ancestor*",
    "delegat*",
    "patch*",
    "modif*",
];

const WORKFLOW: &[&str] = &[
    "workflow*",
    "process*",
    "flow",
    "trigger*",
    "state*",
    "stage*",
    "confirm*",
    "button*",
    "action*",
    "lifecycle",
    "happen*",
    "step*",
    "approv*",
    "validat*",
    "onchange",
    "cron",
    "automat*",
];

fn keywords(intent: QueryIntent) -> &'static [&'static str] {
    match intent {
        QueryIntent::Definition => DEFINITION,
        QueryIntent::FieldInquiry => FIELD,
        QueryIntent::InheritanceInquiry => INHERITANCE,
        QueryIntent::WorkflowInquiry => WORKFLOW,
        QueryIntent::Generic => &[],
    }
}

const CANDIDATES: [QueryIntent; 4] = [
    QueryIntent::Definition,
    QueryIntent::FieldInquiry,
    QueryIntent::InheritanceInquiry,
    QueryIntent::WorkflowInquiry,
];

/// Classify a question. Never fails; unclassifiable text is generic.
pub fn classify(question: &str) -> QueryIntent {
    let lower = question.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '\''))
        .map(|w| w.trim_matches('\''))
        .filter(|w| !w.is_empty())
        .collect();
    let phrase_text = format!(" {} ", words.join(" "));

    let mut best = QueryIntent::Generic;
    let mut best_score = 0;
    let mut tied = false;
    for intent in CANDIDATES {
        let score = score(keywords(intent), &words, &phrase_text);
        if score > best_score {
            best = intent;
            best_score = score;
            tied = false;
        } else if score == best_score && score > 0 {
            tied = true;
        }
    }
    if tied {
        QueryIntent::Generic
    } else {
        best
    }
}

fn score(keywords: &[&str], words: &[&str], phrase_text: &str) -> usize {
    keywords
        .iter()
        .filter(|kw| {
            if kw.contains(' ') || kw.contains('\'') {
                phrase_text.contains(&format!(" {kw} "))
            } else if let Some(prefix) = kw.strip_suffix('*') {
                words.iter().any(|w| w.starts_with(prefix))
            } else {
                words.iter().any(|w| w == *kw)
            }
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_questions() {
        assert_eq!(
            classify("What fields are defined in the partner model?"),
            QueryIntent::FieldInquiry
        );
        assert_eq!(
            classify("Which columns on sale.order are computed?"),
            QueryIntent::FieldInquiry
        );
    }

    #[test]
    fn inheritance_questions() {
        assert_eq!(
            classify("How does sale_custom extend sale.order?"),
            QueryIntent::InheritanceInquiry
        );
        assert_eq!(
            classify("Which xpath customizations apply to the order form?"),
            QueryIntent::InheritanceInquiry
        );
    }

    #[test]
    fn definition_and_workflow_questions() {
        assert_eq!(
            classify("What is the purpose of crm.lead?"),
            QueryIntent::Definition
        );
        assert_eq!(
            classify("What happens when the confirm button is clicked?"),
            QueryIntent::WorkflowInquiry
        );
    }

    #[test]
    fn ties_and_unknowns_are_generic() {
        assert_eq!(classify("hello there"), QueryIntent::Generic);
        assert_eq!(classify(""), QueryIntent::Generic);
        // one field keyword, one inheritance keyword
        assert_eq!(classify("inherited fields"), QueryIntent::Generic);
    }
}
