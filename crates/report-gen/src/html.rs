//! HTML template for the morning report. Inline styles only, so the file
//! opens cleanly from disk and inside email clients. Not an API surface:
//! downstream consumers parse the CSV or the state JSON instead.

use crate::{sector_breakdown, ReportContext, TOP_N};
use screener_core::{Band, Signal};

fn esc(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn signal_color(signal: Signal) -> &'static str {
    match signal {
        Signal::Buy => "#22c55e",
        Signal::Sell => "#ef4444",
        Signal::Hold => "#64748b",
    }
}

fn band_color(band: Band) -> &'static str {
    match band {
        Band::High => "#22c55e",
        Band::Med => "#f59e0b",
        Band::Low => "#94a3b8",
    }
}

const TH: &str = "padding:8px 12px;text-align:left;color:#94a3b8;font-size:12px;text-transform:uppercase;";
const TD: &str = "padding:8px 12px;border-top:1px solid #e2e8f0;";

pub fn render(ctx: &ReportContext<'_>) -> String {
    let header = render_header(ctx);
    let market = render_market(ctx);
    let opportunities = render_opportunities(ctx);
    let sectors = render_sectors(ctx);
    let issues = render_issues(ctx);

    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><meta name="viewport" content="width=device-width,initial-scale=1"><title>Morning Screen {date}</title></head>
<body style="margin:0;padding:0;background:#f1f5f9;font-family:-apple-system,BlinkMacSystemFont,'Segoe UI',Roboto,sans-serif;">
<table width="100%" cellpadding="0" cellspacing="0" style="background:#f1f5f9;padding:32px 0;">
  <tr><td align="center">
    <table width="760" cellpadding="0" cellspacing="0" style="background:#ffffff;border-radius:8px;overflow:hidden;box-shadow:0 1px 3px rgba(0,0,0,0.1);">
      <tr><td>{header}</td></tr>
      <tr><td>{market}</td></tr>
      <tr><td>{opportunities}</td></tr>
      <tr><td>{sectors}</td></tr>
      <tr><td>{issues}</td></tr>
    </table>
    <p style="color:#94a3b8;font-size:11px;margin-top:16px;">NightScreen Overnight Pipeline</p>
  </td></tr>
</table>
</body>
</html>"#,
        date = ctx.date,
        header = header,
        market = market,
        opportunities = opportunities,
        sectors = sectors,
        issues = issues,
    )
}

fn render_header(ctx: &ReportContext<'_>) -> String {
    format!(
        r#"<div style="background:#1e293b;color:#fff;padding:16px 20px;font-size:20px;font-weight:700;">Morning Screen &mdash; {} ({})</div>
<table style="width:100%;border-collapse:collapse;">
  <tr><td style="{td}">Scanned</td><td style="{td}font-weight:600;">{}</td>
      <td style="{td}">Predicted</td><td style="{td}font-weight:600;">{}</td>
      <td style="{td}">Duration</td><td style="{td}font-weight:600;">{:.1}s</td></tr>
</table>"#,
        ctx.date,
        esc(ctx.universe_name),
        ctx.scanned_count,
        ctx.predicted_count,
        ctx.duration_sec,
        td = TD,
    )
}

fn render_market(ctx: &ReportContext<'_>) -> String {
    let s = ctx.sentiment;
    let regime = ctx.regime;
    let gauge = s
        .vol_gauge_level
        .map(|v| format!("{:.1}", v))
        .unwrap_or_else(|| "&ndash;".to_string());
    format!(
        r#"<div style="padding:12px 20px;font-size:16px;font-weight:700;color:#1e293b;">Market Context</div>
<table style="width:100%;border-collapse:collapse;">
  <tr><th style="{th}">Sentiment</th><th style="{th}">Stance</th><th style="{th}">1d</th><th style="{th}">5d</th><th style="{th}">14d</th><th style="{th}">Gap</th><th style="{th}">Vol Gauge</th><th style="{th}">Regime</th><th style="{th}">Crash Risk</th></tr>
  <tr>
    <td style="{td}font-weight:600;">{:.0}</td>
    <td style="{td}font-weight:600;">{}</td>
    <td style="{td}">{:+.2}%</td>
    <td style="{td}">{:+.2}%</td>
    <td style="{td}">{:+.2}%</td>
    <td style="{td}">{:+.2}% ({:.0}%)</td>
    <td style="{td}">{}</td>
    <td style="{td}font-weight:600;">{}</td>
    <td style="{td}">{:.2}</td>
  </tr>
</table>"#,
        s.sentiment_score,
        s.recommendation.stance.label(),
        s.index_change_1d,
        s.index_change_5d,
        s.index_change_14d,
        s.gap_prediction.pct,
        s.gap_prediction.confidence * 100.0,
        gauge,
        regime.label.label(),
        regime.crash_risk,
        th = TH,
        td = TD,
    )
}

fn render_opportunities(ctx: &ReportContext<'_>) -> String {
    if ctx.scored.is_empty() {
        return format!(
            r#"<div style="padding:12px 20px;font-size:16px;font-weight:700;color:#1e293b;">Top Opportunities</div>
<div style="padding:0 20px 16px;color:#64748b;">No opportunities survived screening tonight.</div>"#,
        );
    }

    let rows: String = ctx
        .scored
        .iter()
        .take(TOP_N)
        .enumerate()
        .map(|(i, stock)| {
            let price = stock
                .price
                .map(|p| format!("{:.2}", p))
                .unwrap_or_else(|| "&ndash;".to_string());
            format!(
                r#"  <tr>
    <td style="{td}color:#94a3b8;">{}</td>
    <td style="{td}font-weight:600;">{}</td>
    <td style="{td}">{}</td>
    <td style="{td}">{}</td>
    <td style="{td}">{:.1}</td>
    <td style="{td}font-weight:600;color:{};">{}</td>
    <td style="{td}">{:.0}%</td>
    <td style="{td}font-weight:700;">{:.1}</td>
    <td style="{td}font-weight:600;color:{};">{}</td>
  </tr>
"#,
                i + 1,
                esc(&stock.ticker),
                esc(&stock.sector),
                price,
                stock.screening_score,
                signal_color(stock.prediction.signal),
                stock.prediction.signal.label(),
                stock.prediction.ensemble_confidence * 100.0,
                stock.opportunity_score,
                band_color(stock.opportunity_band),
                stock.opportunity_band.label(),
                td = TD,
            )
        })
        .collect();

    format!(
        r#"<div style="padding:12px 20px;font-size:16px;font-weight:700;color:#1e293b;">Top Opportunities</div>
<table style="width:100%;border-collapse:collapse;">
  <tr><th style="{th}">#</th><th style="{th}">Ticker</th><th style="{th}">Sector</th><th style="{th}">Price</th><th style="{th}">Screen</th><th style="{th}">Signal</th><th style="{th}">Conf</th><th style="{th}">Score</th><th style="{th}">Band</th></tr>
{rows}</table>"#,
        th = TH,
        rows = rows,
    )
}

fn render_sectors(ctx: &ReportContext<'_>) -> String {
    let rows: String = sector_breakdown(ctx.scored)
        .into_iter()
        .map(|s| {
            format!(
                r#"  <tr><td style="{td}font-weight:600;">{}</td><td style="{td}">{}</td><td style="{td}">{:.1}</td></tr>
"#,
                esc(&s.name),
                s.count,
                s.median_score,
                td = TD,
            )
        })
        .collect();

    format!(
        r#"<div style="padding:12px 20px;font-size:16px;font-weight:700;color:#1e293b;">Sector Breakdown</div>
<table style="width:100%;border-collapse:collapse;">
  <tr><th style="{th}">Sector</th><th style="{th}">Count</th><th style="{th}">Median Score</th></tr>
{rows}</table>"#,
        th = TH,
        rows = rows,
    )
}

fn render_issues(ctx: &ReportContext<'_>) -> String {
    if ctx.errors.is_empty() && ctx.warnings.is_empty() {
        return format!(
            r#"<div style="padding:16px 20px;border-top:1px solid #e2e8f0;color:#94a3b8;font-size:12px;">Clean run: no errors, no warnings.</div>"#,
        );
    }

    let errors: String = ctx
        .errors
        .iter()
        .map(|e| format!(r#"<li style="color:#ef4444;">{}</li>"#, esc(e)))
        .collect();
    let warnings: String = ctx
        .warnings
        .iter()
        .map(|w| format!(r#"<li style="color:#f59e0b;">{}</li>"#, esc(w)))
        .collect();

    format!(
        r#"<div style="padding:12px 20px;font-size:16px;font-weight:700;color:#1e293b;">Errors &amp; Warnings</div>
<ul style="margin:0;padding:0 20px 16px 40px;font-size:13px;">{}{}</ul>"#,
        errors, warnings,
    )
}
