//! Assertion helpers over session event streams

#![allow(dead_code)]

use patchline_update::{Event, SessionState, UpdateStatus};

pub fn statuses(events: &[Event]) -> Vec<UpdateStatus> {
    events.iter().filter_map(Event::status).collect()
}

pub fn transitions(events: &[Event]) -> Vec<(SessionState, SessionState)> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::State(t) => Some((t.from, t.to)),
            _ => None,
        })
        .collect()
}

pub fn download_percentages(events: &[Event]) -> Vec<f64> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::Download(p) => Some(p.percentage),
            _ => None,
        })
        .collect()
}

pub fn unpack_percentages(events: &[Event]) -> Vec<f64> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::Unpack(p) => Some(p.percentage),
            _ => None,
        })
        .collect()
}

/// Assert every lifecycle marker is strictly greater than the one before it
pub fn assert_strictly_increasing(statuses: &[UpdateStatus]) {
    for pair in statuses.windows(2) {
        assert!(
            pair[0] < pair[1],
            "lifecycle marker {:?} followed by {:?}",
            pair[0],
            pair[1]
        );
    }
}

/// Assert percentages stay within [0, 100] and never decrease
pub fn assert_bounded_monotonic(values: &[f64], what: &str) {
    for value in values {
        assert!(
            (0.0..=100.0).contains(value),
            "{} percentage {} out of range",
            what,
            value
        );
    }
    for pair in values.windows(2) {
        assert!(
            pair[0] <= pair[1],
            "{} percentage went from {} to {}",
            what,
            pair[0],
            pair[1]
        );
    }
}
