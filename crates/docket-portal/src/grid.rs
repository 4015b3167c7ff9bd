//! Grid extraction: pending-requirements table → canonical rows.

use serde::{Deserialize, Serialize};

use docket_types::PendingRequirement;

use crate::driver::{GridSnapshot, PortalError, PortalSession, parse_registros};

/// Header labels the portals render, per canonical field. Spanish and
/// Catalan variants observed in production.
const HEADER_ALIASES: &[(&str, &[&str])] = &[
    ("tipo_doc", &["TIPO DOCUMENTO", "TIPO DOC", "TIPO", "TIPUS DE DOCUMENT", "TIPUS"]),
    ("elemento", &["ELEMENTO", "ELEMENT", "TRABAJADOR", "TREBALLADOR"]),
    ("empresa", &["EMPRESA", "COMPANYIA"]),
    ("estado", &["ESTADO", "ESTAT"]),
    ("origen", &["ORIGEN"]),
    ("fecha_solicitud", &["FECHA SOLICITUD", "F. SOLICITUD", "DATA SOL·LICITUD", "DATA SOLLICITUD"]),
    ("inicio", &["INICIO", "INICI"]),
    ("fin", &["FIN", "FI"]),
];

/// A parsed grid: canonical rows plus scrape diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GridExtract {
    pub rows: Vec<PendingRequirement>,
    pub frame_url: String,
    /// Count announced by the "X Registros" counter, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub announced_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counter_text: Option<String>,
}

/// Map a rendered header label to its canonical field, tolerating accents in
/// neither direction (labels are matched normalized).
fn canonical_field(header: &str) -> Option<&'static str> {
    let norm = docket_rowkey::normalize(header);
    for (field, aliases) in HEADER_ALIASES {
        if aliases.iter().any(|a| *a == norm) {
            return Some(field);
        }
    }
    None
}

/// Parse the current page's grid into canonical pending requirements.
///
/// Fails with [`PortalError::GridParseMismatch`] when the counter announces
/// rows but none parse; an empty result is only trusted when the portal
/// agrees it is empty.
pub fn extract_grid(session: &mut dyn PortalSession) -> Result<GridExtract, PortalError> {
    let snapshot = session.grid()?;
    let frame_url = session.current_url();
    extract_from_snapshot(&snapshot, frame_url)
}

/// Pure half of [`extract_grid`], split out for direct testing.
pub fn extract_from_snapshot(
    snapshot: &GridSnapshot,
    frame_url: String,
) -> Result<GridExtract, PortalError> {
    let announced_count = snapshot.counter_text.as_deref().and_then(parse_registros);

    let field_columns: Vec<Option<&'static str>> = snapshot
        .headers
        .iter()
        .map(|h| canonical_field(h))
        .collect();

    let mut rows = Vec::with_capacity(snapshot.rows.len());
    for raw in &snapshot.rows {
        let mut req = PendingRequirement::default();
        for (cell, field) in raw.cells.iter().zip(field_columns.iter()) {
            let value = cell.trim();
            if value.is_empty() {
                continue;
            }
            match *field {
                Some("tipo_doc") => req.tipo_doc = value.to_string(),
                Some("elemento") => req.elemento = value.to_string(),
                Some("empresa") => req.empresa = value.to_string(),
                Some("estado") => req.estado = Some(value.to_string()),
                Some("origen") => req.origen = Some(value.to_string()),
                Some("fecha_solicitud") => req.fecha_solicitud = Some(value.to_string()),
                Some("inicio") => req.inicio = Some(value.to_string()),
                Some("fin") => req.fin = Some(value.to_string()),
                _ => {}
            }
        }

        // Rows that mapped nothing at all (separator rows, footer noise)
        // are dropped rather than keyed on an empty fingerprint.
        if req.tipo_doc.is_empty() && req.elemento.is_empty() && req.empresa.is_empty() {
            continue;
        }

        docket_rowkey::canonicalize(&mut req, raw.internal_id.as_deref(), &raw.cells);
        rows.push(req);
    }

    if rows.is_empty()
        && let Some(announced) = announced_count
        && announced > 0
    {
        return Err(PortalError::GridParseMismatch {
            expected: announced,
        });
    }

    Ok(GridExtract {
        rows,
        frame_url,
        announced_count,
        counter_text: snapshot.counter_text.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::RawRow;

    fn snapshot(headers: &[&str], rows: Vec<Vec<&str>>, counter: Option<&str>) -> GridSnapshot {
        GridSnapshot {
            headers: headers.iter().map(|s| s.to_string()).collect(),
            rows: rows
                .into_iter()
                .map(|cells| RawRow {
                    cells: cells.into_iter().map(String::from).collect(),
                    internal_id: None,
                })
                .collect(),
            counter_text: counter.map(String::from),
        }
    }

    #[test]
    fn extracts_rows_by_header_label() {
        let snap = snapshot(
            &["Tipo Documento", "Elemento", "Empresa", "Estado"],
            vec![
                vec!["Recibo SS", "Emilio Roldán", "ACME SL", "Pendiente"],
                vec!["Seguro RC", "ACME SL", "ACME SL", "Pendiente"],
            ],
            Some("2 Registros"),
        );

        let extract = extract_from_snapshot(&snap, "https://portal/pending".to_string())
            .expect("extract");
        assert_eq!(extract.rows.len(), 2);
        assert_eq!(extract.announced_count, Some(2));
        assert_eq!(extract.rows[0].tipo_doc, "Recibo SS");
        assert_eq!(extract.rows[0].elemento, "Emilio Roldán");
        assert_eq!(extract.rows[0].estado.as_deref(), Some("Pendiente"));
        assert!(!extract.rows[0].pending_item_key.is_empty());
        assert!(!extract.rows[0].raw_row_signature.is_empty());
    }

    #[test]
    fn catalan_headers_map_to_the_same_fields() {
        let spanish = snapshot(
            &["Tipo Documento", "Elemento", "Empresa"],
            vec![vec!["Recibo SS", "ACME", "ACME"]],
            None,
        );
        let catalan = snapshot(
            &["Tipus de document", "Element", "Empresa"],
            vec![vec!["Recibo SS", "ACME", "ACME"]],
            None,
        );

        let a = extract_from_snapshot(&spanish, String::new()).expect("extract");
        let b = extract_from_snapshot(&catalan, String::new()).expect("extract");
        assert_eq!(a.rows[0].pending_item_key, b.rows[0].pending_item_key);
    }

    #[test]
    fn unknown_headers_are_ignored() {
        let snap = snapshot(
            &["Tipo Documento", "Acciones", "Empresa"],
            vec![vec!["Recibo SS", "[botón]", "ACME"]],
            None,
        );
        let extract = extract_from_snapshot(&snap, String::new()).expect("extract");
        assert_eq!(extract.rows[0].tipo_doc, "Recibo SS");
        assert_eq!(extract.rows[0].empresa, "ACME");
        assert_eq!(extract.rows[0].elemento, "");
    }

    #[test]
    fn counter_with_no_rows_is_a_parse_mismatch() {
        let snap = snapshot(
            &["Tipo Documento", "Elemento", "Empresa"],
            vec![],
            Some("16 Registros"),
        );
        let err = extract_from_snapshot(&snap, String::new()).expect_err("must fail");
        assert_eq!(err, PortalError::GridParseMismatch { expected: 16 });
    }

    #[test]
    fn zero_counter_with_no_rows_is_fine() {
        let snap = snapshot(
            &["Tipo Documento", "Elemento", "Empresa"],
            vec![],
            Some("0 Registros"),
        );
        let extract = extract_from_snapshot(&snap, String::new()).expect("extract");
        assert!(extract.rows.is_empty());
        assert_eq!(extract.announced_count, Some(0));
    }

    #[test]
    fn noise_rows_without_mapped_fields_are_dropped() {
        let snap = snapshot(
            &["Tipo Documento", "Elemento", "Empresa"],
            vec![vec!["", "", ""], vec!["Recibo SS", "ACME", "ACME"]],
            None,
        );
        let extract = extract_from_snapshot(&snap, String::new()).expect("extract");
        assert_eq!(extract.rows.len(), 1);
    }

    #[test]
    fn internal_id_drives_the_key() {
        let mut snap = snapshot(
            &["Tipo Documento", "Elemento", "Empresa"],
            vec![vec!["Recibo SS", "ACME", "ACME"]],
            None,
        );
        snap.rows[0].internal_id = Some("req-77".to_string());

        let extract = extract_from_snapshot(&snap, String::new()).expect("extract");
        assert_eq!(extract.rows[0].pending_item_key, "ID:REQ-77");
    }
}
