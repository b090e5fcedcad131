//! Markdown decision report rendered from stored records.

use chrono::{DateTime, Utc};

use ramp_core::BenchmarkRecord;

/// Every model sharing the best score, plus that score.
fn champions<'a>(
    records: &'a [BenchmarkRecord],
    score: impl Fn(&BenchmarkRecord) -> Option<f64>,
    higher_is_better: bool,
) -> (Vec<&'a BenchmarkRecord>, Option<f64>) {
    let scored: Vec<(&BenchmarkRecord, f64)> = records
        .iter()
        .filter_map(|r| score(r).map(|s| (r, s)))
        .collect();
    let best = scored.iter().map(|(_, s)| *s).reduce(|a, b| {
        if (b > a) == higher_is_better {
            b
        } else {
            a
        }
    });
    let Some(best) = best else {
        return (Vec::new(), None);
    };
    let winners = scored
        .into_iter()
        .filter(|(_, s)| (s - best).abs() < 1e-12)
        .map(|(r, _)| r)
        .collect();
    (winners, Some(best))
}

fn names(winners: &[&BenchmarkRecord]) -> String {
    if winners.is_empty() {
        return "n/a".into();
    }
    winners
        .iter()
        .map(|r| format!("**{}**", r.model))
        .collect::<Vec<_>>()
        .join(", ")
}

fn heading(single: &str, plural: &str, count: usize) -> String {
    if count > 1 {
        plural.into()
    } else {
        single.into()
    }
}

fn mark(r: &BenchmarkRecord, tag: &str) -> &'static str {
    if r.capabilities_validated.iter().any(|t| t == tag) {
        "yes"
    } else {
        "no"
    }
}

fn context_label(ctx: Option<u32>) -> String {
    ctx.map_or("none".into(), |c| format!("{c} tokens"))
}

fn size_label(size_gb: Option<f64>) -> String {
    size_gb.map_or("n/a".into(), |gb| format!("{gb:.1} GB"))
}

pub fn render_report(records: &[BenchmarkRecord], generated_at: DateTime<Utc>) -> Option<String> {
    if records.is_empty() {
        return None;
    }
    let mut out = String::new();
    out.push_str("# Model benchmark decision report\n\n");
    out.push_str(&format!(
        "> Generated {} from {} model(s).\n\n",
        generated_at.format("%Y-%m-%d %H:%M UTC"),
        records.len()
    ));

    // --- Executive summary ---
    out.push_str("## Executive summary\n\n");

    let (smart, best) = champions(records, |r| r.functional.as_ref().map(|f| f.reasoning_avg), true);
    out.push_str(&format!(
        "### {}\n{}\n",
        heading("Best reasoning", "Best reasoning (tie)", smart.len()),
        names(&smart)
    ));
    if let Some(score) = best {
        out.push_str(&format!("- Reasoning score: **{:.0}%**\n", score * 100.0));
    }
    out.push_str("- Suited to agents, RAG and document analysis.\n\n");

    let (fast, best) = champions(
        records,
        |r| (r.avg_tokens_per_second > 0.0).then_some(r.avg_tokens_per_second),
        true,
    );
    out.push_str(&format!(
        "### {}\n{}\n",
        heading("Fastest", "Fastest (tie)", fast.len()),
        names(&fast)
    ));
    if let (Some(tps), Some(first)) = (best, fast.first()) {
        out.push_str(&format!("- Speed: **{tps:.0} tok/s** ({})\n", first.ux_rating));
    }
    out.push_str("- Suited to real-time chat and completion.\n\n");

    let (frugal, best) = champions(
        records,
        |r| (r.co2_per_1k_tokens_kg > 0.0).then_some(r.co2_per_1k_tokens_kg),
        false,
    );
    out.push_str(&format!(
        "### {}\n{}\n",
        heading("Most frugal", "Most frugal (tie)", frugal.len()),
        names(&frugal)
    ));
    if let Some(kg) = best {
        out.push_str(&format!("- Impact: **{:.4} gCO2e** per 1k tokens\n", kg * 1000.0));
    }
    out.push_str("- Suited to batch processing and high-volume use.\n\n");

    // --- Decision matrix ---
    out.push_str("## Decision matrix\n\n");
    out.push_str("| Model | Kind | Size | Max context | UX | Reasoning | Efficiency | Tools | JSON | Languages |\n");
    out.push_str("|-------|------|------|-------------|----|-----------|------------|-------|------|-----------|\n");
    for r in records {
        let reasoning = r
            .functional
            .as_ref()
            .map_or("n/a".to_string(), |f| format!("{:.0}%", f.reasoning_avg * 100.0));
        out.push_str(&format!(
            "| **{}** | {} | {} | {} | {} | {} | {} | {} | {} | {} |\n",
            r.model,
            r.kind,
            size_label(r.size_gb),
            context_label(r.max_validated_context),
            r.ux_rating,
            reasoning,
            r.efficiency_grade,
            mark(r, "tools_validated"),
            mark(r, "json_validated"),
            r.languages_validated().len(),
        ));
    }

    // --- Environmental impact ---
    out.push_str("\n## Environmental impact\n\n");
    out.push_str("| Model | Max validated context | gCO2e / 1k tokens | Total gCO2e | Source |\n");
    out.push_str("|-------|-----------------------|-------------------|-------------|--------|\n");
    for r in records {
        let source = if r.kind == ramp_core::ModelKind::Remote {
            "api estimate"
        } else if r.energy_degraded {
            "estimated"
        } else {
            "measured"
        };
        out.push_str(&format!(
            "| {} | {} | {:.4} | {:.4} | {} |\n",
            r.model,
            context_label(r.max_validated_context),
            r.co2_per_1k_tokens_kg * 1000.0,
            r.total_co2_kg * 1000.0,
            source,
        ));
    }

    out.push_str("\n## Notes\n\n");
    out.push_str("- UX rating is based on time to first token; under 300 ms feels instant.\n");
    out.push_str("- Efficiency is reasoning quality per gram of CO2e per 1k tokens.\n");
    out.push_str("- A context tier only counts when it ran without swap, timeout or failure.\n");
    Some(out)
}
