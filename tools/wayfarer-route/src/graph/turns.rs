//! Turn expansion: the arcs of the turn-expanded graph, derived on demand
//! from segments, turn rules and the build penalties.

use super::{GraphStore, TurnRule};

/// One permitted turn from a segment onto the next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Turn {
    pub from: u32,
    pub to: u32,
    /// Turn penalty alone, in deciseconds
    pub penalty: u32,
    /// Arc weight: the `from` segment's weight plus the penalty
    pub weight: u32,
    /// Arc distance: the `from` segment's length
    pub distance: u32,
}

impl GraphStore {
    /// Call `f` for every turn permitted after traversing `from`.
    ///
    /// U-turns onto the reverse segment are only allowed at dead ends.
    pub fn for_each_turn(&self, from: u32, mut f: impl FnMut(Turn)) {
        let via = self.edge_head(from);
        let reverse = self.edge_reverse(from);
        let outgoing = self.edges(via);
        let dead_end = outgoing.clone().all(|e| Some(e) == reverse);
        let signal = if self.is_traffic_signal(via) {
            self.meta.traffic_signal_penalty
        } else {
            0
        };

        for to in outgoing {
            let mut penalty = signal;
            if Some(to) == reverse {
                if !dead_end {
                    continue;
                }
                penalty = penalty.saturating_add(self.meta.u_turn_penalty);
            }
            match self.turn_rule(via, from, to) {
                Some(TurnRule::Forbidden) => continue,
                Some(TurnRule::Penalty(p)) => penalty = penalty.saturating_add(p),
                None => {}
            }
            f(Turn {
                from,
                to,
                penalty,
                weight: self.edge_weight(from).saturating_add(penalty),
                distance: self.edge_distance(from),
            });
        }
    }

    /// The turn from `from` onto `to`, if it is permitted
    pub fn turn_between(&self, from: u32, to: u32) -> Option<Turn> {
        let mut found = None;
        self.for_each_turn(from, |t| {
            if t.to == to && found.is_none() {
                found = Some(t);
            }
        });
        found
    }

    /// All permitted turns after `from`
    #[cfg(test)]
    pub(crate) fn turns(&self, from: u32) -> Vec<Turn> {
        let mut out = Vec::new();
        self.for_each_turn(from, |t| out.push(t));
        out
    }
}
