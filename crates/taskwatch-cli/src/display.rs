//! Human-readable output: the HTML notification body and the `status` card.

use std::borrow::Cow;
use std::fmt::Write;

use taskwatch_core::{DiffResult, OrderSummary, PointsUpdate};
use taskwatch_store::PersistedState;

const STYLE: &str = "<style>\
.table-container {overflow-x: auto;}\
table {width: 100%;border-collapse: collapse;}\
.new-tasks {min-width: 700px;}\
.new-points {min-width: 100px;}\
th, td {border: 1px solid black;padding: 8px;text-align: left;}\
.detail-time {width: 50px;word-wrap: break-word;}\
.other-column {width: 10px;word-wrap: break-word;}\
</style>";

// ── Notification body ──

/// Render a non-empty diff as one styled HTML message.
///
/// The new-orders table and the points table are independent; either may be
/// absent.
pub fn render_message(diff: &DiffResult) -> String {
    let mut html = String::from(STYLE);
    if diff.has_new_orders() {
        let _ = write!(html, "<h4>New orders. Latest id is now {}</h4>", diff.max_id);
        html.push_str(&new_orders_table(&diff.new_orders));
    }
    if !diff.updated_orders.is_empty() {
        html.push_str("<h4>Points updated</h4>");
        html.push_str(&points_table(&diff.updated_orders));
    }
    html
}

fn new_orders_table(orders: &[OrderSummary]) -> String {
    let mut html = String::from(
        "<div class=\"table-container\"><table class=\"new-tasks\"><tr>\
         <th class=\"other-column\">ID</th>\
         <th class=\"detail-time\">Detail</th>\
         <th class=\"detail-time\">Created</th>\
         <th class=\"other-column\">Unit income</th>\
         <th class=\"other-column\">Points</th></tr>",
    );
    for order in orders {
        let _ = write!(
            html,
            "<tr><td class=\"other-column\">{}</td>\
             <td class=\"detail-time\">{}</td>\
             <td class=\"detail-time\">{}</td>\
             <td class=\"other-column\">{}</td>\
             <td class=\"other-column\">{}</td></tr>",
            order.id,
            escape_html(&order.detail),
            order.created_html(),
            order.unit_income,
            order.points,
        );
    }
    html.push_str("</table></div>");
    html
}

fn points_table(updates: &[PointsUpdate]) -> String {
    let mut html = String::from(
        "<div class=\"table-container\"><table class=\"new-points\"><tr>\
         <th class=\"other-column\">ID</th>\
         <th class=\"other-column\">Points before</th>\
         <th class=\"other-column\">Points after</th></tr>",
    );
    for update in updates {
        let _ = write!(
            html,
            "<tr><td class=\"other-column\">{}</td>\
             <td class=\"other-column\">{}</td>\
             <td class=\"other-column\">{}</td></tr>",
            update.order.id, update.points_before, update.order.points,
        );
    }
    html.push_str("</table></div>");
    html
}

/// Escape the characters that would let remote text break out of a cell.
fn escape_html(s: &str) -> Cow<'_, str> {
    if !s.contains(['<', '>', '&', '"', '\'']) {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len() + 16);
    for c in s.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

// ── Status card ──

/// Print the persisted state: counters first, then the most recent orders.
pub fn print_status(state: &PersistedState, limit: usize) {
    println!("=== taskwatch state ===");
    println!("  {:<16} {}", "latest id", state.ledger.highest_id_seen);
    println!("  {:<16} {}", "recorded orders", state.ledger.orders.len());
    println!(
        "  {:<16} {}",
        "account",
        state.account.as_ref().map_or("(refresh token only)", |a| a.username.as_str())
    );
    let topic = if state.channel.topic.is_empty() {
        "(none)"
    } else {
        state.channel.topic.as_str()
    };
    println!("  {:<16} {}", "relay topic", topic);
    println!();

    if state.ledger.orders.is_empty() {
        return;
    }
    println!("  {:>6}  {:>8}  {:>10}  {:<19}  name", "id", "points", "income", "created");
    for order in state.ledger.latest(limit) {
        println!(
            "  {:>6}  {:>8}  {:>10}  {:<19}  {}",
            order.id,
            order.points,
            order.unit_income,
            order.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            order.name
        );
    }
}
