//! Context guardrail for write-side operations.
//!
//! Every WRITE (plan persist, decision pack, execute, schedule mutation)
//! must name the coordination triplet through request headers. READ paths
//! never call into this module.

use std::collections::BTreeMap;

use thiserror::Error;

use docket_types::{CoordinationContext, codes};

pub const HEADER_OWN_COMPANY: &str = "X-Coordination-Own-Company";
pub const HEADER_PLATFORM: &str = "X-Coordination-Platform";
pub const HEADER_COORDINATED_COMPANY: &str = "X-Coordination-Coordinated-Company";
/// Required additionally for real uploads.
pub const HEADER_REAL_UPLOADER: &str = "X-USE-REAL-UPLOADER";
/// Single-tenant legacy header, honored in dev/test only.
pub const HEADER_LEGACY_TENANT: &str = "X-Tenant";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ContextError {
    pub error_code: &'static str,
    pub message: String,
}

fn get<'a>(headers: &'a BTreeMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
        .filter(|v| !v.trim().is_empty())
}

/// Validate the coordination headers of a write request.
///
/// In `dev`/`test` environments the legacy single-tenant header still
/// resolves to a context (the tenant stands in for all three fields).
pub fn require_write_context(
    headers: &BTreeMap<String, String>,
    environment: &str,
) -> Result<CoordinationContext, ContextError> {
    let own_company = get(headers, HEADER_OWN_COMPANY);
    let platform = get(headers, HEADER_PLATFORM);
    let coordinated_company = get(headers, HEADER_COORDINATED_COMPANY);

    if let (Some(own_company), Some(platform), Some(coordinated_company)) =
        (own_company, platform, coordinated_company)
    {
        return Ok(CoordinationContext {
            own_company: own_company.to_string(),
            platform: platform.to_string(),
            coordinated_company: coordinated_company.to_string(),
        });
    }

    if matches!(environment, "dev" | "test")
        && let Some(tenant) = get(headers, HEADER_LEGACY_TENANT)
    {
        return Ok(CoordinationContext {
            own_company: tenant.to_string(),
            platform: tenant.to_string(),
            coordinated_company: tenant.to_string(),
        });
    }

    let mut missing = Vec::new();
    if own_company.is_none() {
        missing.push(HEADER_OWN_COMPANY);
    }
    if platform.is_none() {
        missing.push(HEADER_PLATFORM);
    }
    if coordinated_company.is_none() {
        missing.push(HEADER_COORDINATED_COMPANY);
    }

    Err(ContextError {
        error_code: codes::MISSING_COORDINATION_CONTEXT,
        message: format!(
            "faltan cabeceras de coordinación: {}",
            missing.join(", ")
        ),
    })
}

/// Whether the real-uploader opt-in header is present and set to "1".
pub fn has_real_uploader_header(headers: &BTreeMap<String, String>) -> bool {
    get(headers, HEADER_REAL_UPLOADER) == Some("1")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn full_triplet_resolves() {
        let h = headers(&[
            (HEADER_OWN_COMPANY, "own"),
            (HEADER_PLATFORM, "e-coordina"),
            (HEADER_COORDINATED_COMPANY, "acme"),
        ]);
        let ctx = require_write_context(&h, "production").expect("context");
        assert_eq!(ctx.platform, "e-coordina");
        assert_eq!(ctx.coordinated_company, "acme");
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let h = headers(&[
            ("x-coordination-own-company", "own"),
            ("X-COORDINATION-PLATFORM", "p"),
            ("x-Coordination-Coordinated-Company", "c"),
        ]);
        assert!(require_write_context(&h, "production").is_ok());
    }

    #[test]
    fn missing_headers_name_what_is_missing() {
        let h = headers(&[(HEADER_OWN_COMPANY, "own")]);
        let err = require_write_context(&h, "production").expect_err("must fail");
        assert_eq!(err.error_code, codes::MISSING_COORDINATION_CONTEXT);
        assert!(err.message.contains(HEADER_PLATFORM));
        assert!(err.message.contains(HEADER_COORDINATED_COMPANY));
        assert!(!err.message.contains(HEADER_OWN_COMPANY));
    }

    #[test]
    fn empty_values_count_as_missing() {
        let h = headers(&[
            (HEADER_OWN_COMPANY, "  "),
            (HEADER_PLATFORM, "p"),
            (HEADER_COORDINATED_COMPANY, "c"),
        ]);
        assert!(require_write_context(&h, "production").is_err());
    }

    #[test]
    fn legacy_tenant_header_only_works_in_dev_and_test() {
        let h = headers(&[(HEADER_LEGACY_TENANT, "solo-tenant")]);

        let ctx = require_write_context(&h, "dev").expect("dev accepts legacy");
        assert_eq!(ctx.own_company, "solo-tenant");
        assert!(require_write_context(&h, "test").is_ok());
        assert!(require_write_context(&h, "production").is_err());
    }

    #[test]
    fn real_uploader_header_must_be_one() {
        assert!(has_real_uploader_header(&headers(&[(
            HEADER_REAL_UPLOADER,
            "1"
        )])));
        assert!(!has_real_uploader_header(&headers(&[(
            HEADER_REAL_UPLOADER,
            "true"
        )])));
        assert!(!has_real_uploader_header(&headers(&[])));
    }
}
