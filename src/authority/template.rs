// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)

//! Placeholder expansion for configuration values.
//!
//! Placeholders have the form `${NAME}`. Two kinds of values use them:
//!
//! - file references in issuer configuration, expanded from the process
//!   environment when the configuration is loaded (see [`expand_env`])
//! - AIA/OCSP/CRL URL templates, expanded with [`ISSUER_ID`] every time an
//!   issuer is asked for a URL
//!
//! Unknown placeholders are left unchanged.

/// Placeholder replaced by the hex-encoded subject key identifier of an issuer.
pub const ISSUER_ID: &str = "ISSUER_ID";

/// Expand `${NAME}` placeholders using `lookup`.
///
/// # Examples
///
/// ```
/// use usg_ca::authority::template::expand;
///
/// let url = expand("https://ca.example/crl/${ISSUER_ID}.crl", |name| {
///     (name == "ISSUER_ID").then(|| "ab12".to_string())
/// });
/// assert_eq!(url, "https://ca.example/crl/ab12.crl");
/// ```
pub fn expand<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut result = input.to_string();
    let mut start = 0;

    while let Some(var_start) = result[start..].find("${") {
        let absolute_start = start + var_start;

        if let Some(var_end) = result[absolute_start..].find('}') {
            let absolute_end = absolute_start + var_end;
            let var_name = &result[absolute_start + 2..absolute_end];

            if let Some(value) = lookup(var_name) {
                result.replace_range(absolute_start..absolute_end + 1, &value);
                // Continue searching after the replacement
                start = absolute_start + value.len();
            } else {
                start = absolute_end + 1;
            }
        } else {
            // No closing brace
            break;
        }
    }

    result
}

/// Expand placeholders from environment variables.
///
/// [`ISSUER_ID`] is never taken from the environment, so URL templates
/// survive configuration loading intact.
pub fn expand_env(input: &str) -> String {
    expand(input, |name| {
        if name == ISSUER_ID {
            None
        } else {
            std::env::var(name).ok()
        }
    })
}

/// Expand [`ISSUER_ID`] with `issuer_id`, leaving other placeholders alone.
pub fn expand_issuer_id(template: &str, issuer_id: &str) -> String {
    expand(template, |name| {
        (name == ISSUER_ID).then(|| issuer_id.to_string())
    })
}
