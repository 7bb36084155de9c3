use crate::config::MessageConfig;

/// Replace `{key}` placeholders in one pass over the template, so text
/// substituted for one key is never rescanned. Unknown placeholders are
/// left as-is.
pub fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let value = after.find('}').and_then(|close| {
            let key = &after[..close];
            values
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (*v, close))
        });
        match value {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

pub fn offer_pickup(messages: &MessageConfig, address: &str) -> String {
    fill(&messages.offer_pickup, &[("address", address)])
}

pub fn confirm_summary(
    messages: &MessageConfig,
    name: &str,
    pickup: &str,
    destination: &str,
) -> String {
    fill(
        &messages.confirm_summary,
        &[("name", name), ("pickup", pickup), ("destination", destination)],
    )
}
