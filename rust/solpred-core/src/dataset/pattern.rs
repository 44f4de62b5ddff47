// rust/solpred-core/src/dataset/pattern.rs

//! Brace expansion of shard path patterns.
//!
//! A split is addressed by a single pattern such as
//! `fold1/train_{0000..0036}.tar`. Numeric ranges keep the zero padding of
//! the wider bound; `{a,b,c}` lists alternatives. Several groups expand left
//! to right, so the result order is the order shards will be visited in.

use crate::error::{LoaderError, Result};

/// Upper bound on the number of shards one pattern may denote.
pub const MAX_SHARDS: usize = 1_000_000;

/// Expand a shard pattern into the ordered list of shard paths it denotes.
///
/// # Errors
///
/// Returns a configuration error for an empty pattern, unbalanced or nested
/// braces, a range whose bounds are not integers, or a pattern denoting more
/// than [`MAX_SHARDS`] shards.
pub fn expand_pattern(pattern: &str) -> Result<Vec<String>> {
    if pattern.trim().is_empty() {
        return Err(LoaderError::config("shard pattern must not be empty"));
    }
    expand(pattern, pattern)
}

fn expand(rest: &str, pattern: &str) -> Result<Vec<String>> {
    let open = match rest.find(['{', '}']) {
        None => return Ok(vec![rest.to_string()]),
        Some(idx) if rest.as_bytes()[idx] == b'}' => {
            return Err(unbalanced(pattern));
        }
        Some(idx) => idx,
    };

    let after_open = &rest[open + 1..];
    let close = match after_open.find(['{', '}']) {
        Some(idx) if after_open.as_bytes()[idx] == b'}' => idx,
        Some(_) => {
            return Err(LoaderError::config(format!(
                "nested braces are not supported in shard pattern '{pattern}'"
            )))
        }
        None => return Err(unbalanced(pattern)),
    };

    let prefix = &rest[..open];
    let body = &after_open[..close];
    let alternatives = expand_group(body, pattern)?;
    let tails = expand(&after_open[close + 1..], pattern)?;

    if alternatives.len().saturating_mul(tails.len()) > MAX_SHARDS {
        return Err(too_many(pattern));
    }

    let mut out = Vec::with_capacity(alternatives.len() * tails.len());
    for alt in &alternatives {
        for tail in &tails {
            out.push(format!("{prefix}{alt}{tail}"));
        }
    }
    Ok(out)
}

fn expand_group(body: &str, pattern: &str) -> Result<Vec<String>> {
    if body.contains(',') {
        return Ok(body.split(',').map(str::to_string).collect());
    }

    let Some((start, end)) = body.split_once("..") else {
        // A group with neither a list nor a range is kept literally.
        return Ok(vec![format!("{{{body}}}")]);
    };

    let parse = |bound: &str| {
        bound.parse::<i64>().map_err(|_| {
            LoaderError::config(format!(
                "range bound '{bound}' is not an integer in shard pattern '{pattern}'"
            ))
        })
    };
    let (lo, hi) = (parse(start)?, parse(end)?);
    if lo.abs_diff(hi) >= MAX_SHARDS as u64 {
        return Err(too_many(pattern));
    }

    let width = if is_padded(start) || is_padded(end) {
        start.len().max(end.len())
    } else {
        0
    };

    let values: Vec<i64> = if lo <= hi {
        (lo..=hi).collect()
    } else {
        (hi..=lo).rev().collect()
    };

    Ok(values
        .into_iter()
        .map(|v| {
            if v < 0 {
                format!("-{:0>width$}", v.unsigned_abs(), width = width.saturating_sub(1))
            } else {
                format!("{v:0>width$}")
            }
        })
        .collect())
}

fn is_padded(bound: &str) -> bool {
    let digits = bound.trim_start_matches('-');
    digits.len() > 1 && digits.starts_with('0')
}

fn too_many(pattern: &str) -> LoaderError {
    LoaderError::config(format!(
        "shard pattern '{pattern}' denotes more than {MAX_SHARDS} shards"
    ))
}

fn unbalanced(pattern: &str) -> LoaderError {
    LoaderError::config(format!("unbalanced braces in shard pattern '{pattern}'"))
}
