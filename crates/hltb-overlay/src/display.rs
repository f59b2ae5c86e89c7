//! Overlay views, their markup, and the style block.

use crate::types::HltbRecord;

/// Stable id of the overlay element, used for idempotent removal/replacement.
pub const OVERLAY_ID: &str = "hltb-for-millennium";

/// Id of the injected `<style>` element.
pub const STYLE_ID: &str = "hltb-styles";

/// Presentation rules injected once per page.
pub const STYLES: &str = r#"
#hltb-for-millennium {
  position: absolute;
  bottom: 0;
  right: 0;
  width: fit-content;
  z-index: 100;
}

.hltb-info {
  background: rgba(14, 20, 27, 0.85);
  border-top: 2px solid rgba(61, 68, 80, 0.54);
  padding: 8px 0;
}

.hltb-info ul {
  list-style: none;
  padding: 0 20px;
  margin: 0;
  display: flex;
  justify-content: space-evenly;
  align-items: center;
}

.hltb-info ul li {
  text-align: center;
  padding: 0 10px;
}

.hltb-info p {
  margin: 0;
  color: #ffffff;
}

.hltb-gametime {
  font-size: 16px;
  font-weight: bold;
}

.hltb-label {
  text-transform: uppercase;
  font-size: 10px;
  opacity: 0.7;
}

.hltb-count {
  font-size: 9px;
  opacity: 0.5;
}

.hltb-details-btn {
  background: transparent;
  border: none;
  color: #1a9fff;
  font-size: 10px;
  font-weight: bold;
  text-transform: uppercase;
  cursor: pointer;
  padding: 5px 10px;
}

.hltb-details-btn:hover {
  color: #ffffff;
}
"#;

const PLACEHOLDER_LABELS: [&str; 3] = ["Main Story", "Main + Extras", "Completionist"];

/// What the overlay element currently shows.
#[derive(Debug, Clone, PartialEq)]
pub enum OverlayView {
    /// Placeholder shown while data is resolving or when none is available.
    Loading,
    /// Completion times for the current game.
    Populated(HltbRecord),
    /// Explicit "nothing to show" variant with an optional message.
    Empty { message: Option<String> },
}

impl OverlayView {
    /// Whether this view carries real data.
    pub fn is_populated(&self) -> bool {
        matches!(self, OverlayView::Populated(_))
    }

    /// Record shown by a populated view.
    pub fn record(&self) -> Option<&HltbRecord> {
        match self {
            OverlayView::Populated(record) => Some(record),
            _ => None,
        }
    }

    /// Render the overlay element as markup.
    pub fn to_html(&self) -> String {
        let items = match self {
            OverlayView::Loading => PLACEHOLDER_LABELS
                .iter()
                .map(|label| stat_item("--", label, None))
                .collect::<String>(),
            OverlayView::Populated(record) => {
                let mut items: String = measures(record)
                    .into_iter()
                    .filter(|m| m.seconds > 0)
                    .map(|m| stat_item(&format_time(m.seconds), m.label, m.count))
                    .collect();
                items.push_str(&format!(
                    "<li><button class=\"hltb-details-btn\" \
                     onclick=\"window.open('steam://openurl_external/{}')\">View Details</button></li>",
                    record.details_url()
                ));
                items
            }
            OverlayView::Empty { message } => format!(
                "<li><p class=\"hltb-label\">{}</p></li>",
                escape_html(message.as_deref().unwrap_or("No data available"))
            ),
        };

        format!("<div id=\"{OVERLAY_ID}\"><div class=\"hltb-info\"><ul>{items}</ul></div></div>")
    }

    /// One-line plain-text rendering for terminals and logs.
    pub fn to_text(&self) -> String {
        match self {
            OverlayView::Loading => "How Long To Beat: loading".to_string(),
            OverlayView::Empty { message } => format!(
                "How Long To Beat: {}",
                message.as_deref().unwrap_or("No data available")
            ),
            OverlayView::Populated(record) => {
                let parts: Vec<String> = measures(record)
                    .into_iter()
                    .map(|m| match m.count.filter(|c| *c > 0) {
                        Some(count) => format!("{} {} ({count})", m.label, format_time(m.seconds)),
                        None => format!("{} {}", m.label, format_time(m.seconds)),
                    })
                    .collect();
                let name = if record.game_name.is_empty() {
                    format!("#{}", record.game_id)
                } else {
                    record.game_name.clone()
                };
                format!("{name}: {} ({})", parts.join(" | "), record.details_url())
            }
        }
    }
}

struct Measure {
    label: &'static str,
    seconds: u64,
    count: Option<u32>,
}

fn measures(record: &HltbRecord) -> [Measure; 4] {
    [
        Measure {
            label: "Main Story",
            seconds: record.comp_main,
            count: record.comp_main_count,
        },
        Measure {
            label: "Main + Extras",
            seconds: record.comp_plus,
            count: record.comp_plus_count,
        },
        Measure {
            label: "Completionist",
            seconds: record.comp_100,
            count: record.comp_100_count,
        },
        Measure {
            label: "All Styles",
            seconds: record.comp_all,
            count: record.comp_all_count,
        },
    ]
}

fn stat_item(value: &str, label: &str, count: Option<u32>) -> String {
    let count = match count {
        Some(n) if n > 0 => format!("<p class=\"hltb-count\">({n})</p>"),
        _ => String::new(),
    };
    format!(
        "<li><p class=\"hltb-gametime\">{}</p><p class=\"hltb-label\">{}</p>{count}</li>",
        escape_html(value),
        escape_html(label)
    )
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Format a duration in seconds for the overlay.
///
/// Zero means "no data" and renders as `--`. Durations under an hour render
/// in whole minutes, longer ones in hours with at most one decimal.
///
/// # Examples
/// ```
/// use hltb_overlay::display::format_time;
/// assert_eq!(format_time(0), "--");
/// assert_eq!(format_time(1800), "30m");
/// assert_eq!(format_time(7200), "2h");
/// assert_eq!(format_time(5400), "1.5h");
/// ```
pub fn format_time(seconds: u64) -> String {
    if seconds == 0 {
        return "--".to_string();
    }
    let hours = (seconds as f64 / 3600.0 * 10.0).round() / 10.0;
    if hours < 1.0 {
        let mins = (seconds as f64 / 60.0).round() as u64;
        return format!("{mins}m");
    }
    if hours.fract() == 0.0 {
        format!("{}h", hours as u64)
    } else {
        format!("{hours}h")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0), "--");
        assert_eq!(format_time(1800), "30m");
        assert_eq!(format_time(7200), "2h");
        assert_eq!(format_time(5400), "1.5h");
        assert_eq!(format_time(45), "1m");
        // Rounds up into the hour bucket like the hour display does.
        assert_eq!(format_time(3590), "1h");
        assert_eq!(format_time(199_800), "55.5h");
    }

    #[test]
    fn test_populated_omits_missing_measures_and_zero_counts() {
        let mut record = HltbRecord::new(10270, "Portal 2", 30_600, 0, 79_200, 0);
        record.comp_main_count = Some(1520);
        record.comp_100_count = Some(0);
        let html = OverlayView::Populated(record).to_html();

        assert!(html.contains("id=\"hltb-for-millennium\""));
        assert!(html.contains("8.5h"));
        assert!(html.contains("22h"));
        assert!(html.contains("(1520)"));
        assert!(!html.contains("(0)"));
        assert!(!html.contains("Main + Extras"));
        assert!(html.contains("https://howlongtobeat.com/game/10270"));
    }

    #[test]
    fn test_loading_and_empty_views() {
        let loading = OverlayView::Loading.to_html();
        assert_eq!(loading.matches("--").count(), 3);

        let empty = OverlayView::Empty {
            message: Some("<none>".to_string()),
        }
        .to_html();
        assert!(empty.contains("&lt;none&gt;"));

        let default_empty = OverlayView::Empty { message: None }.to_text();
        assert!(default_empty.ends_with("No data available"));
    }
}
