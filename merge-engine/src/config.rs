//! Tunable constants of the matching heuristics.

/// Items of the left sequence searched for an exact match before giving up.
pub const DEFAULT_LOOKAHEAD: usize = 10;
/// Assignment targets closer than this edit distance are the same target.
pub const DEFAULT_ASSIGNMENT_MAX_DISTANCE: usize = 2;
pub const DEFAULT_CALL_ARGS_JACCARD: f64 = 0.6;
pub const DEFAULT_BODY_JACCARD: f64 = 0.5;
/// Used instead of [`DEFAULT_BODY_JACCARD`] when several candidates compete.
pub const DEFAULT_BODY_JACCARD_STRICT: f64 = 0.8;
pub const DEFAULT_DICT_KEYS_JACCARD: f64 = 0.5;
/// Source lines quoted per subject inside a conflict marker.
pub const DEFAULT_EXCERPT_LINES: usize = 5;

#[derive(Debug, Clone)]
pub struct MergeConfig {
    pub lookahead: usize,
    pub assignment_max_distance: usize,
    pub call_args_jaccard: f64,
    pub body_jaccard: f64,
    pub body_jaccard_strict: f64,
    pub dict_keys_jaccard: f64,
    pub excerpt_lines: usize,
    /// Re-parse the enclosing statement after every applied edit.
    pub validate: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            lookahead: DEFAULT_LOOKAHEAD,
            assignment_max_distance: DEFAULT_ASSIGNMENT_MAX_DISTANCE,
            call_args_jaccard: DEFAULT_CALL_ARGS_JACCARD,
            body_jaccard: DEFAULT_BODY_JACCARD,
            body_jaccard_strict: DEFAULT_BODY_JACCARD_STRICT,
            dict_keys_jaccard: DEFAULT_DICT_KEYS_JACCARD,
            excerpt_lines: DEFAULT_EXCERPT_LINES,
            validate: true,
        }
    }
}
