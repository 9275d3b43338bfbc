use indexmap::IndexMap;

use super::context::PipelineContext;
use super::model::Job;

/// Expand `$NAME` and `${NAME}` references in `input`.
///
/// `$$` produces a literal `$`, which also keeps the reference out of reach
/// of the job shell. Unknown variables expand to the empty string. Expansion
/// is a single pass; values are never re-expanded.
pub fn expand(input: &str, vars: &IndexMap<String, String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }

        match chars.peek() {
            Some('$') => {
                chars.next();
                out.push('$');
            }
            Some('{') => {
                chars.next();
                let mut name = String::new();
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == '}' {
                        closed = true;
                        break;
                    }
                    name.push(inner);
                }
                if closed {
                    out.push_str(vars.get(&name).map_or("", String::as_str));
                } else {
                    // Unterminated brace, keep the text as authored
                    out.push_str("${");
                    out.push_str(&name);
                }
            }
            Some(next) if next.is_ascii_alphabetic() || *next == '_' => {
                let mut name = String::new();
                while let Some(&inner) = chars.peek() {
                    if inner.is_ascii_alphanumeric() || inner == '_' {
                        name.push(inner);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(vars.get(&name).map_or("", String::as_str));
            }
            _ => out.push('$'),
        }
    }

    out
}

/// The full variable set a job executes with.
///
/// Precedence, lowest to highest: predefined context variables, descriptor
/// globals merged with job-level variables (already combined during plan
/// resolution), then `--var` overrides from the command line.
pub fn job_environment(job: &Job, ctx: &PipelineContext) -> IndexMap<String, String> {
    let mut vars = ctx.predefined();
    vars.insert("CI_JOB_NAME".to_string(), job.name.clone());
    vars.insert("CI_STAGE".to_string(), job.stage.clone());

    for (key, value) in &job.variables {
        vars.insert(key.clone(), value.clone());
    }
    for (key, value) in &ctx.variables {
        vars.insert(key.clone(), value.clone());
    }

    vars
}
