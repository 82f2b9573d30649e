// ABOUTME: Host names for preview deployments derived from an application's wildcard domain.
// ABOUTME: traefik.me wildcards embed the server IP so the host resolves without DNS setup.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("wildcard domain '{0}' must start with \"*.\"")]
pub struct WildcardError(pub String);

/// Expand `wildcard` for one preview.
///
/// `*.example.com` becomes `{app}.example.com`. For `traefik.me` the label
/// also carries the server IP with dots replaced by dashes, so
/// `*.traefik.me` on `10.0.0.5` becomes `{app}-10-0-0-5.traefik.me`.
pub fn wildcard_host(
    wildcard: &str,
    app_name: &str,
    server_ip: Option<&str>,
) -> Result<String, WildcardError> {
    if !wildcard.starts_with("*.") {
        return Err(WildcardError(wildcard.to_string()));
    }

    let label = match server_ip.map(str::trim).filter(|ip| !ip.is_empty()) {
        Some(ip) if wildcard.contains("traefik.me") => {
            format!("{}-{}", app_name, ip.replace('.', "-"))
        }
        _ => app_name.to_string(),
    };
    Ok(wildcard.replacen('*', &label, 1))
}
