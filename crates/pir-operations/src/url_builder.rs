use crate::error::{OperationError, Result};
use chrono::Utc;
use pir_browser::ActionContext;

/// Expand the `{placeholder}`s of a navigate action's URL template.
///
/// Supported: `{first}`, `{middle}`, `{last}`, `{full_name}`, `{city}`,
/// `{state}`, `{age}` and `{profile_url}`. Names and cities are lowercased
/// with spaces turned into hyphens, as broker search URLs expect.
pub fn build_url(template: &str, context: &ActionContext) -> Result<String> {
    let mut url = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        url.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after.find('}').ok_or_else(|| {
            OperationError::Unknown(format!("unterminated placeholder in URL template {template}"))
        })?;
        url.push_str(&placeholder_value(&after[..end], context)?);
        rest = &after[end + 1..];
    }
    url.push_str(rest);

    Ok(url)
}

fn placeholder_value(name: &str, context: &ActionContext) -> Result<String> {
    let query = &context.profile_query;
    let extracted = context.extracted_profile.as_ref();

    let value = match name {
        "first" => Some(slug(&query.first_name)),
        "middle" => Some(query.middle_name.as_deref().map(slug).unwrap_or_default()),
        "last" => Some(slug(&query.last_name)),
        "full_name" => Some(slug(&query.full_name())),
        "city" => Some(slug(&query.city)),
        "state" => Some(query.state.clone()),
        "age" => extracted
            .and_then(|p| p.age.clone())
            .or_else(|| Some(query.age_at(Utc::now()).to_string())),
        "profile_url" => extracted.and_then(|p| p.profile_url.clone()),
        _ => {
            return Err(OperationError::Unknown(format!(
                "unknown URL placeholder {{{name}}}"
            )))
        }
    };

    value.ok_or_else(|| OperationError::Unknown(format!("no value for URL placeholder {{{name}}}")))
}

fn slug(value: &str) -> String {
    value.trim().to_lowercase().replace(' ', "-")
}
