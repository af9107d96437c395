//! HNSW removal with local graph repair.

use crate::hnsw::index::HnswIndex;

impl HnswIndex {
    /// Remove every node of `docid`. Removing an absent document is a no-op.
    pub fn remove_document(&self, docid: u32) {
        let nodeids = self.id_mapping.lock().free_ids(docid);
        for nodeid in nodeids {
            if self.graph.get_levels_ref(nodeid).valid() {
                self.remove_node(nodeid);
            }
        }
    }

    fn remove_node(&self, nodeid: u32) {
        let num_levels = self.graph.get_level_array(nodeid).len();
        for level in (0..num_levels).rev() {
            let neighbors = self.graph.get_link_array(nodeid, level).to_vec();
            let is_entry = self
                .graph
                .get_entry_node()
                .is_some_and(|entry| entry.nodeid == nodeid);
            if is_entry {
                if let Some(&promoted) = neighbors.first() {
                    tracing::debug!(
                        removed = nodeid,
                        promoted,
                        level,
                        "promoting neighbor to entry point"
                    );
                    self.graph.set_entry_node(Some((promoted, level as u32)));
                }
            }
            for &neighbor in &neighbors {
                self.remove_link_to(neighbor, nodeid, level);
            }
            self.mutual_reconnect(&neighbors, level);
        }

        if self
            .graph
            .get_entry_node()
            .is_some_and(|entry| entry.nodeid == nodeid)
        {
            let replacement = self.highest_level_node_except(nodeid);
            match replacement {
                Some((promoted, level)) => tracing::debug!(
                    removed = nodeid,
                    promoted,
                    level,
                    "isolated entry point removed, using highest remaining node"
                ),
                None => tracing::debug!(removed = nodeid, "last node removed"),
            }
            self.graph.set_entry_node(replacement);
        }
        self.graph.remove_node(nodeid);
    }

    /// Link pairs of former neighbors of a removed node, closest pairs first,
    /// as long as both ends stay under the insert budget.
    fn mutual_reconnect(&self, cluster: &[u32], level: usize) {
        let max_links = self.config.max_links_on_inserts as usize;
        let mut pairs: Vec<(f64, u32, u32)> = Vec::new();
        for (i, &a) in cluster.iter().enumerate() {
            if self.graph.get_level_array(a).len() <= level {
                continue;
            }
            let Some(vector) = self.node_vector(a) else {
                continue;
            };
            let links = self.graph.get_link_array(a, level);
            for &b in &cluster[i + 1..] {
                if links.contains(b) || self.graph.get_level_array(b).len() <= level {
                    continue;
                }
                if let Some(distance) = self.distance_to_node(&vector, b) {
                    pairs.push((distance, a, b));
                }
            }
        }
        pairs.sort_by(|x, y| x.0.total_cmp(&y.0).then((x.1, x.2).cmp(&(y.1, y.2))));

        let mut added = 0usize;
        for (_, a, b) in pairs {
            let links_a = self.graph.get_link_array(a, level);
            let links_b = self.graph.get_link_array(b, level);
            if links_a.len() < max_links && links_b.len() < max_links && !links_a.contains(b) {
                self.add_link_to(a, b, level);
                self.add_link_to(b, a, level);
                added += 1;
            }
        }
        if added == 0 && cluster.len() > 1 {
            tracing::debug!(level, cluster = cluster.len(), "no feasible reconnection");
        }
    }

    fn highest_level_node_except(&self, excluded: u32) -> Option<(u32, u32)> {
        let mut best: Option<(u32, u32)> = None;
        for nodeid in 0..self.graph.node_id_limit() {
            if nodeid == excluded {
                continue;
            }
            let levels = self.graph.get_level_array(nodeid).len();
            if levels == 0 {
                continue;
            }
            let level = levels as u32 - 1;
            if best.map_or(true, |(_, best_level)| level > best_level) {
                best = Some((nodeid, level));
            }
        }
        best
    }
}
