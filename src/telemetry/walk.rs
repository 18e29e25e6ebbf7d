//! Walker step span helpers.

use tracing::Span;

/// Start a span covering one step of a walk.
///
/// `walk.phase` starts empty and is filled by [`record_phase`].
pub fn start_step_span(item: &str, cursor: usize) -> Span {
    tracing::info_span!(
        "walk.step",
        "walk.item" = item,
        "walk.cursor" = cursor,
        "walk.phase" = tracing::field::Empty,
    )
}

/// Record the phase the step moved into, on the span and as an event.
pub fn record_phase(span: &Span, from: &str, to: &str) {
    span.record("walk.phase", to);
    span.in_scope(|| {
        tracing::debug!(from = from, to = to, "phase_transition");
    });
}
