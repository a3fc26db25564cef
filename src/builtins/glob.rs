//! Glob matching over delimiter-separated text.
//!
//! Patterns compile into anchored regexes. Compiled patterns live in a
//! process-wide LRU keyed by `(pattern, delimiters)`, guarded by a mutex.

use std::num::NonZeroUsize;
use std::sync::{Mutex, OnceLock};

use lru::LruCache;
use regex::Regex;

use crate::consts::GLOB_CACHE_CAPACITY;
use crate::error::{BuiltinError, EvalError};
use crate::value::Value;

use super::BuiltinContext;

static PATTERNS: OnceLock<Mutex<LruCache<String, Regex>>> = OnceLock::new();

fn patterns() -> &'static Mutex<LruCache<String, Regex>> {
    PATTERNS.get_or_init(|| {
        Mutex::new(LruCache::new(
            NonZeroUsize::new(GLOB_CACHE_CAPACITY).expect("nonzero capacity"),
        ))
    })
}

/// `glob.match(pattern, delimiters, text)`. `delimiters` is `null` for
/// none, or an array of single-character strings defaulting to `['.']`
/// when present but empty.
pub fn matches(
    ctx: &mut BuiltinContext<'_>,
    pattern: &Value,
    delimiters: &Value,
    text: &Value,
) -> Result<Option<Value>, EvalError> {
    let Value::String(pattern) = pattern else {
        ctx.error(BuiltinError::type_error(
            "glob.match",
            "string",
            pattern.type_name(),
        ));
        return Ok(None);
    };
    let Value::String(text) = text else {
        ctx.error(BuiltinError::type_error(
            "glob.match",
            "string",
            text.type_name(),
        ));
        return Ok(None);
    };
    let seps = match delimiters {
        Value::Null => Vec::new(),
        Value::Array(elems) => {
            if elems.is_empty() {
                vec!['.']
            } else {
                let mut seps = Vec::with_capacity(elems.len());
                for elem in elems.iter() {
                    let Value::String(s) = elem else {
                        ctx.error(BuiltinError::type_error(
                            "glob.match",
                            "string delimiter",
                            elem.type_name(),
                        ));
                        return Ok(None);
                    };
                    let mut chars = s.chars();
                    match (chars.next(), chars.next()) {
                        (Some(c), None) => seps.push(c),
                        _ => {
                            ctx.error(BuiltinError::operand(
                                "glob.match",
                                "delimiters must be single characters",
                            ));
                            return Ok(None);
                        }
                    }
                }
                seps
            }
        }
        other => {
            ctx.error(BuiltinError::type_error(
                "glob.match",
                "array or null",
                other.type_name(),
            ));
            return Ok(None);
        }
    };

    let mut cache_key = String::with_capacity(pattern.len() + seps.len() + 1);
    cache_key.push_str(pattern);
    cache_key.push('\u{0}');
    cache_key.extend(seps.iter());

    {
        let mut cache = patterns().lock().expect("poisoned");
        if let Some(re) = cache.get(&cache_key) {
            return Ok(Some(Value::Bool(re.is_match(text))));
        }
    }

    let source = match translate(pattern, &seps) {
        Ok(source) => source,
        Err(msg) => {
            ctx.error(BuiltinError::generic("glob.match", msg));
            return Ok(None);
        }
    };
    let re = match Regex::new(&source) {
        Ok(re) => re,
        Err(e) => {
            ctx.error(BuiltinError::generic("glob.match", e.to_string()));
            return Ok(None);
        }
    };
    let matched = re.is_match(text);
    patterns().lock().expect("poisoned").put(cache_key, re);
    Ok(Some(Value::Bool(matched)))
}

/// Translate a glob into an anchored regex. `*` stays within one
/// delimiter-separated segment, `**` crosses delimiters, `?` matches one
/// non-delimiter character; `[...]` classes and `{a,b}` alternates pass
/// through.
fn translate(pattern: &str, seps: &[char]) -> Result<String, String> {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');
    translate_inner(&mut pattern.chars().peekable(), seps, &mut out, false)?;
    out.push('$');
    Ok(out)
}

fn segment_class(seps: &[char], negated: bool) -> String {
    if seps.is_empty() {
        return ".".to_string();
    }
    let mut class = String::from("[");
    if negated {
        class.push('^');
    }
    for c in seps {
        class.push_str(&regex::escape(&c.to_string()));
    }
    class.push(']');
    class
}

fn translate_inner(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    seps: &[char],
    out: &mut String,
    in_alternate: bool,
) -> Result<(), String> {
    while let Some(&c) = chars.peek() {
        match c {
            '*' => {
                chars.next();
                if chars.peek() == Some(&'*') {
                    chars.next();
                    out.push_str(".*");
                } else if seps.is_empty() {
                    out.push_str(".*");
                } else {
                    out.push_str(&segment_class(seps, true));
                    out.push('*');
                }
            }
            '?' => {
                chars.next();
                if seps.is_empty() {
                    out.push('.');
                } else {
                    out.push_str(&segment_class(seps, true));
                }
            }
            '[' => {
                chars.next();
                out.push('[');
                if chars.peek() == Some(&'!') {
                    chars.next();
                    out.push('^');
                }
                let mut closed = false;
                for inner in chars.by_ref() {
                    match inner {
                        ']' => {
                            closed = true;
                            break;
                        }
                        '\\' | '^' => {
                            out.push('\\');
                            out.push(inner);
                        }
                        _ => out.push(inner),
                    }
                }
                if !closed {
                    return Err("unterminated character class".to_string());
                }
                out.push(']');
            }
            '{' => {
                chars.next();
                out.push_str("(?:");
                loop {
                    translate_inner(chars, seps, out, true)?;
                    match chars.next() {
                        Some(',') => out.push('|'),
                        Some('}') => break,
                        _ => return Err("unterminated alternate".to_string()),
                    }
                }
                out.push(')');
            }
            ',' | '}' if in_alternate => return Ok(()),
            '\\' => {
                chars.next();
                match chars.next() {
                    Some(escaped) => out.push_str(&regex::escape(&escaped.to_string())),
                    None => return Err("trailing escape".to_string()),
                }
            }
            _ => {
                chars.next();
                out.push_str(&regex::escape(&c.to_string()));
            }
        }
    }
    if in_alternate {
        return Err("unterminated alternate".to_string());
    }
    Ok(())
}
