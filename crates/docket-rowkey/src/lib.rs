//! Deterministic fingerprints for pending-requirement grid rows.
//!
//! A pending-item key survives pagination, re-renders and whitespace noise:
//! it is the identity the pagination driver dedupes on and the executor
//! re-locates by. Construction, first rule that applies:
//!
//! 1. The row exposes an internal identifier (href parameter, data
//!    attribute): `ID:` + normalized id.
//! 2. Concatenation of the non-empty normalized row fields in fixed order.
//! 3. Fallback to the raw row signature (first five cell texts).

use docket_types::PendingRequirement;

/// Normalize portal text for fingerprinting: Unicode-uppercase, collapse
/// internal whitespace, trim.
pub fn normalize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_space = false;
    for c in s.trim().chars() {
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        for upper in c.to_uppercase() {
            out.push(upper);
        }
    }
    out
}

/// Debug fingerprint: the first five cell texts joined by `|`, unnormalized.
pub fn raw_signature(cells: &[String]) -> String {
    cells
        .iter()
        .take(5)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("|")
}

/// Compute the pending-item key for a row.
///
/// Two rows share a key iff they represent the same pending requirement,
/// regardless of visual rendering.
pub fn key_for_row(row: &PendingRequirement, internal_id: Option<&str>) -> String {
    if let Some(id) = internal_id {
        let norm = normalize(id);
        if !norm.is_empty() {
            return format!("ID:{norm}");
        }
    }

    let fields: [(&str, &str); 8] = [
        ("TIPO", row.tipo_doc.as_str()),
        ("ELEM", row.elemento.as_str()),
        ("EMP", row.empresa.as_str()),
        ("EST", row.estado.as_deref().unwrap_or("")),
        ("ORIG", row.origen.as_deref().unwrap_or("")),
        ("FSOL", row.fecha_solicitud.as_deref().unwrap_or("")),
        ("INI", row.inicio.as_deref().unwrap_or("")),
        ("FIN", row.fin.as_deref().unwrap_or("")),
    ];

    let parts: Vec<String> = fields
        .iter()
        .filter_map(|(tag, value)| {
            let norm = normalize(value);
            if norm.is_empty() {
                None
            } else {
                Some(format!("{tag}:{norm}"))
            }
        })
        .collect();

    if parts.is_empty() {
        row.raw_row_signature.clone()
    } else {
        parts.join(" | ")
    }
}

/// Fill in `pending_item_key` and `raw_row_signature` for a freshly
/// extracted row. Idempotent: canonicalizing a canonical row changes
/// nothing.
pub fn canonicalize(row: &mut PendingRequirement, internal_id: Option<&str>, cells: &[String]) {
    if row.raw_row_signature.is_empty() {
        row.raw_row_signature = raw_signature(cells);
    }
    row.pending_item_key = key_for_row(row, internal_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn row(tipo: &str, elem: &str, emp: &str) -> PendingRequirement {
        PendingRequirement {
            tipo_doc: tipo.to_string(),
            elemento: elem.to_string(),
            empresa: emp.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn normalize_folds_case_and_whitespace() {
        assert_eq!(normalize("  Recibo   SS \t"), "RECIBO SS");
        assert_eq!(normalize("emilio roldán"), "EMILIO ROLDÁN");
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   "), "");
    }

    #[test]
    fn internal_id_wins_over_fields() {
        let r = row("Recibo SS", "ACME", "ACME");
        assert_eq!(key_for_row(&r, Some(" item-42 ")), "ID:ITEM-42");
    }

    #[test]
    fn empty_internal_id_falls_through_to_fields() {
        let r = row("Recibo SS", "ACME", "ACME");
        let key = key_for_row(&r, Some("   "));
        assert!(key.starts_with("TIPO:RECIBO SS"));
    }

    #[test]
    fn field_key_uses_fixed_order_and_skips_empties() {
        let mut r = row("Recibo SS", "Emilio Roldán", "ACME SL");
        r.estado = Some("Pendiente".to_string());
        r.fin = Some("31/12/2026".to_string());

        let key = key_for_row(&r, None);
        assert_eq!(
            key,
            "TIPO:RECIBO SS | ELEM:EMILIO ROLDÁN | EMP:ACME SL | EST:PENDIENTE | FIN:31/12/2026"
        );
    }

    #[test]
    fn rendering_differences_share_a_key() {
        let a = row("Recibo  SS", " ACME ", "acme sl");
        let b = row("recibo ss", "ACME", "ACME  SL");
        assert_eq!(key_for_row(&a, None), key_for_row(&b, None));
    }

    #[test]
    fn all_empty_fields_fall_back_to_signature() {
        let mut r = PendingRequirement {
            raw_row_signature: "a|b|c".to_string(),
            ..Default::default()
        };
        assert_eq!(key_for_row(&r, None), "a|b|c");

        r.raw_row_signature.clear();
        let cells = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        canonicalize(&mut r, None, &cells);
        assert_eq!(r.pending_item_key, "a|b|c");
    }

    #[test]
    fn raw_signature_takes_first_five_cells() {
        let cells: Vec<String> = (0..7).map(|i| format!("c{i}")).collect();
        assert_eq!(raw_signature(&cells), "c0|c1|c2|c3|c4");
    }

    #[test]
    fn canonicalize_is_a_fixed_point() {
        let cells = vec!["Recibo SS".to_string(), "ACME".to_string()];
        let mut r = row("Recibo SS", "ACME", "ACME");
        canonicalize(&mut r, None, &cells);
        let first = r.clone();

        canonicalize(&mut r, None, &cells);
        assert_eq!(r, first);
    }

    proptest! {
        #[test]
        fn key_is_deterministic(
            tipo in "[a-zA-Z áéí]{0,12}",
            elem in "[a-zA-Z ]{0,12}",
            emp in "[a-zA-Z ]{0,12}",
        ) {
            let r = row(&tipo, &elem, &emp);
            prop_assert_eq!(key_for_row(&r, None), key_for_row(&r, None));
        }

        #[test]
        fn normalize_is_idempotent(s in "\\PC{0,40}") {
            let once = normalize(&s);
            prop_assert_eq!(normalize(&once), once);
        }

        #[test]
        fn key_is_nonempty_when_any_field_present(tipo in "[a-z]{1,8}") {
            let r = row(&tipo, "", "");
            prop_assert!(!key_for_row(&r, None).is_empty());
        }
    }
}
