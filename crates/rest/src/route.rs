/// Resources whose id partitions the rate limit
const MAJOR_RESOURCES: [&str; 3] = ["channels", "guilds", "webhooks"];

/// Normalize a request into the route its bucket is tracked under.
///
/// The query string is dropped, ids directly after a major resource are kept,
/// every other numeric id is removed, and anything below `reactions` (the
/// emoji and user segments) is cut off.
///
/// `GET /channels/1/messages/2?limit=5` → `GET /channels/1/messages`
pub fn normalize_route(method: &str, path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or_default();

    let mut kept: Vec<&str> = Vec::new();
    let mut keep_next = false;
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if keep_next {
            kept.push(segment);
            keep_next = false;
            continue;
        }
        if segment == "reactions" {
            kept.push(segment);
            break;
        }
        if is_snowflake(segment) {
            continue;
        }
        keep_next = MAJOR_RESOURCES.contains(&segment);
        kept.push(segment);
    }

    format!("{} /{}", method.to_ascii_uppercase(), kept.join("/"))
}

fn is_snowflake(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}
