/// Metacharacter substrings that allow chaining a second command onto an
/// approved one. The single-character forms also cover `||`, `&&` and `>>`,
/// and `$(` covers arithmetic substitution `$((`.
const METACHARACTERS: &[&str] = &["|", "&", ";", ">", "<", "`", "$("];

/// Tokens that re-enter the shell: `.` is the `source` shorthand.
const FORBIDDEN_TOKENS: &[&str] = &["eval", "exec", "source", "."];

/// Rejects command text containing shell-chaining or substitution
/// metacharacters, or any whitespace-delimited token equal (case-insensitive)
/// to `eval`, `exec`, `source` or `.`.
///
/// This is a denylist, not a sandbox: it stops a caller from chaining an
/// unauthorized command onto an approved one, and cannot be complete against
/// shell quoting edge cases. Callers needing stronger guarantees must
/// restrict the allowed vocabulary at a policy layer above this one.
pub fn is_valid_command(command: &str) -> bool {
    if METACHARACTERS.iter().any(|meta| command.contains(meta)) {
        return false;
    }
    !command
        .split_whitespace()
        .any(|token| FORBIDDEN_TOKENS.iter().any(|t| token.eq_ignore_ascii_case(t)))
}
