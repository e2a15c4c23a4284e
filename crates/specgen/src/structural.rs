//! Structural validator for a generated spec (spec §4.11), applied
//! before persisting. Grounded on the teacher's `sa_skills::manifest`
//! frontmatter-section-parsing style — scan lines, track the current
//! section header, validate required sections are present and
//! non-empty — adapted from YAML frontmatter to markdown headings.

#[derive(Debug, Clone)]
struct Section {
    title: String,
    body: String,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

fn heading_text(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = trimmed[hashes..].trim();
    if rest.is_empty() {
        None
    } else {
        Some(rest)
    }
}

fn parse_sections(markdown: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut current: Option<(String, Vec<&str>)> = None;
    for line in markdown.lines() {
        if let Some(title) = heading_text(line) {
            if let Some((title, body_lines)) = current.take() {
                sections.push(Section {
                    title,
                    body: body_lines.join("\n"),
                });
            }
            current = Some((title.to_string(), Vec::new()));
        } else if let Some((_, body_lines)) = current.as_mut() {
            body_lines.push(line);
        }
    }
    if let Some((title, body_lines)) = current.take() {
        sections.push(Section {
            title,
            body: body_lines.join("\n"),
        });
    }
    sections
}

fn find_section<'a>(sections: &'a [Section], title: &str) -> Option<&'a Section> {
    sections
        .iter()
        .find(|s| s.title.eq_ignore_ascii_case(title))
}

fn is_list_item(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("- ") || t.starts_with("* ") || {
        let digits: String = t.chars().take_while(|c| c.is_ascii_digit()).collect();
        !digits.is_empty() && t[digits.len()..].trim_start().starts_with('.')
    }
}

/// Validates the generated markdown against spec §4.11's structural
/// requirements. `complexity` is the caller's inferred complexity score;
/// `decision_log_threshold` gates whether a `Decision Log` section is
/// mandatory.
pub fn validate_spec(markdown: &str, complexity: u32, decision_log_threshold: u32) -> ValidationResult {
    let sections = parse_sections(markdown);
    let mut result = ValidationResult::default();

    match find_section(&sections, "TL;DR") {
        Some(s) if !s.body.trim().is_empty() => {}
        _ => result.errors.push("missing or empty 'TL;DR' section".into()),
    }

    match find_section(&sections, "Problem Statement") {
        Some(s) if !s.body.trim().is_empty() => {}
        _ => result
            .errors
            .push("missing or empty 'Problem Statement' section".into()),
    }

    let scenarios: Vec<&Section> = sections
        .iter()
        .filter(|s| {
            s.title
                .to_ascii_lowercase()
                .starts_with("scenario:")
        })
        .collect();
    if scenarios.is_empty() {
        result
            .errors
            .push("no '#### Scenario:' blocks found (need >= 1)".into());
    } else {
        for (i, scenario) in scenarios.iter().enumerate() {
            let has_when = scenario
                .body
                .lines()
                .any(|l| l.trim_start().to_ascii_uppercase().starts_with("WHEN"));
            let has_then = scenario
                .body
                .lines()
                .any(|l| l.trim_start().to_ascii_uppercase().starts_with("THEN"));
            if !has_when || !has_then {
                result.errors.push(format!(
                    "scenario {} ('{}') is missing a WHEN or THEN line",
                    i + 1,
                    scenario.title
                ));
            }
        }
    }

    match find_section(&sections, "Implementation Plan") {
        None => result
            .errors
            .push("missing 'Implementation Plan' section".into()),
        Some(s) => {
            let tasks: Vec<&str> = s.body.lines().filter(|l| is_list_item(l)).collect();
            if tasks.is_empty() {
                result
                    .errors
                    .push("'Implementation Plan' has no tasks (need >= 1)".into());
            } else {
                for t in &tasks {
                    if !t.contains('`') && !t.to_ascii_lowercase().contains("touch") {
                        result.warnings.push(format!(
                            "implementation plan task has no apparent touch point: '{}'",
                            t.trim()
                        ));
                    }
                }
            }
        }
    }

    if complexity >= decision_log_threshold {
        match find_section(&sections, "Decision Log") {
            None => result.errors.push(format!(
                "missing 'Decision Log' section required at complexity {complexity}"
            )),
            Some(s) => {
                if !s.body.contains('#') {
                    result
                        .warnings
                        .push("decisions do not appear to cite Gap/Finding ids".into());
                }
            }
        }
    }

    if let Some(s) = sections.iter().find(|s| s.title.eq_ignore_ascii_case("Assumptions")) {
        if !s.body.to_ascii_lowercase().contains("if wrong") {
            result
                .warnings
                .push("assumptions section has no 'If Wrong' fallback noted".into());
        }
    }

    result
}
