use std::fmt::Write;

use crate::models::{OrchestrationResult, OrchestrationState, Payload, SubStatus};

pub fn render_briefing(question: &str, result: &OrchestrationResult) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Outbreak Risk Briefing: {}", result.region_key);
    let _ = writeln!(output, "Question: {}", question.trim());
    let _ = writeln!(output, "Request: {}", result.request_id);
    let _ = writeln!(output);

    if result.state == OrchestrationState::Failed {
        let _ = writeln!(output, "## Status");
        let _ = writeln!(output, "{}", result.synthesized_summary);
        return output;
    }

    let _ = writeln!(output, "## Summary");
    let _ = writeln!(output, "{}", result.synthesized_summary);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Analyses");

    for (intent, sub) in &result.sub_results {
        let status = match sub.status {
            SubStatus::Ok => "OK",
            SubStatus::Degraded => "DEGRADED",
            SubStatus::Failed => "FAILED",
        };
        let _ = writeln!(output);
        let _ = writeln!(output, "### {intent} ({status})");

        if let Some(error) = &sub.error {
            let _ = writeln!(output, "- {}: {}", error.class, error.message);
        }

        match &sub.payload {
            Some(Payload::Trend(s)) => {
                let _ = writeln!(output, "- As of: {}", s.as_of_date);
                let _ = writeln!(output, "- Classification: {}", s.classification);
                let _ = writeln!(
                    output,
                    "- 7-day average: {:.1} (prior {:.1})",
                    s.seven_day_avg, s.prior_seven_day_avg
                );
                let _ = writeln!(output, "- Growth rate: {:+.1}%", s.growth_rate * 100.0);
                let _ = writeln!(output, "- Outbreak probability: {}%", s.outbreak_probability);
                if s.estimated {
                    let _ = writeln!(output, "- Estimated from a partial series");
                }
            }
            Some(Payload::Claim(v)) => {
                let _ = writeln!(output, "- Claim: \"{}\"", v.claim.raw_text.trim());
                let _ = writeln!(output, "- Verdict: {}", v.verdict);
                let _ = writeln!(output, "- Confidence: {:.0}%", v.confidence * 100.0);
                if let Some((low, high)) = v.observed_range {
                    let _ = writeln!(output, "- Observed range: {low:.1}% to {high:.1}%");
                }
                for source in &v.sources {
                    let _ = writeln!(output, "- Source: {source}");
                }
            }
            Some(Payload::Guidance(messages)) => {
                for message in messages {
                    let _ = writeln!(
                        output,
                        "- **{}**: {}",
                        message.audience.as_str(),
                        message.advisory_text
                    );
                }
            }
            Some(Payload::Resources(e)) => {
                let _ = writeln!(output, "- ICU beds: {:.0}", e.projected_icu_beds);
                let _ = writeln!(output, "- Daily testing capacity: {:.0}", e.projected_testing_capacity);
                let _ = writeln!(output, "- PPE units (weekly): {:.0}", e.projected_ppe_units);
                let _ = writeln!(output, "- Estimated cost: ${:.0}", e.cost_estimate);
                let _ = writeln!(output, "- Funding: {}", e.funding_tier);
                for facility in &e.facilities {
                    let _ = writeln!(
                        output,
                        "- Facility: {} ({}) at {:.4}, {:.4}",
                        facility.name, facility.kind, facility.latitude, facility.longitude
                    );
                }
            }
            None => {}
        }
    }

    output
}
