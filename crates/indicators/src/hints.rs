//! Static chart descriptors: where the UI draws each snapshot field.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartPanel {
    /// Drawn over the price candles.
    Overlay,
    /// Drawn in its own sub-chart.
    Sub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Line,
    Histogram,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct FieldHint {
    pub field: &'static str,
    pub panel: ChartPanel,
    pub kind: ChartKind,
}

/// Descriptor table for every drawable snapshot field.
pub fn chart_hints() -> &'static [FieldHint] {
    const HINTS: &[FieldHint] = &[
        FieldHint {
            field: "ema_fast",
            panel: ChartPanel::Overlay,
            kind: ChartKind::Line,
        },
        FieldHint {
            field: "ema_slow",
            panel: ChartPanel::Overlay,
            kind: ChartKind::Line,
        },
        FieldHint {
            field: "rsi",
            panel: ChartPanel::Sub,
            kind: ChartKind::Line,
        },
        FieldHint {
            field: "macd",
            panel: ChartPanel::Sub,
            kind: ChartKind::Line,
        },
        FieldHint {
            field: "macd_signal",
            panel: ChartPanel::Sub,
            kind: ChartKind::Line,
        },
        FieldHint {
            field: "macd_hist",
            panel: ChartPanel::Sub,
            kind: ChartKind::Histogram,
        },
        FieldHint {
            field: "atr",
            panel: ChartPanel::Sub,
            kind: ChartKind::Line,
        },
    ];
    HINTS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hints_cover_macd_hist_as_histogram() {
        let hist = chart_hints()
            .iter()
            .find(|h| h.field == "macd_hist")
            .unwrap();
        assert_eq!(hist.panel, ChartPanel::Sub);
        assert_eq!(hist.kind, ChartKind::Histogram);
    }

    #[test]
    fn test_emas_are_price_overlays() {
        for field in ["ema_fast", "ema_slow"] {
            let h = chart_hints().iter().find(|h| h.field == field).unwrap();
            assert_eq!(h.panel, ChartPanel::Overlay);
        }
    }
}
