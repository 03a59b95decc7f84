//! Scenario-construction helpers shared by the integration tests. Building
//! topologies is not something the library itself does - only test code
//! needs grids and barbells to exercise the protocol over.

use gossip_sim::prelude::AdjacencyList;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;

/// A `width x height` grid where each node is linked to its four
/// orthogonal neighbors.
pub fn grid(width: usize, height: usize) -> AdjacencyList {
    let id = |x: usize, y: usize| y * width + x;
    let mut adj = AdjacencyList::new();
    for y in 0..height {
        for x in 0..width {
            let mut neighbors = Vec::new();
            if x > 0 {
                neighbors.push(id(x - 1, y));
            }
            if x + 1 < width {
                neighbors.push(id(x + 1, y));
            }
            if y > 0 {
                neighbors.push(id(x, y - 1));
            }
            if y + 1 < height {
                neighbors.push(id(x, y + 1));
            }
            adj.insert(id(x, y), neighbors);
        }
    }
    adj
}

/// Two cliques of `cluster_size` nodes joined by a single bridge edge
/// between node 0 of each cluster - the slowest-converging topology for a
/// given node count, since all cross-cluster traffic funnels through one link.
pub fn barbell(cluster_size: usize) -> AdjacencyList {
    let mut adj = AdjacencyList::new();
    let left: Vec<usize> = (0..cluster_size).collect();
    let right: Vec<usize> = (cluster_size..2 * cluster_size).collect();

    for &a in &left {
        let neighbors = left.iter().copied().filter(|&b| b != a).collect();
        adj.insert(a, neighbors);
    }
    for &a in &right {
        let neighbors = right.iter().copied().filter(|&b| b != a).collect();
        adj.insert(a, neighbors);
    }

    adj.get_mut(&0).unwrap().push(cluster_size);
    adj.get_mut(&cluster_size).unwrap().push(0);

    adj
}

/// A random Erdős–Rényi-style graph over `n` nodes where each non-backbone
/// pair is linked independently with probability `p`. A random spanning
/// permutation is always wired in first as a connectivity backbone - a
/// bare Erdős–Rényi draw can leave the graph partitioned into components
/// that can never converge with each other, which would make "does this
/// terminate" an untestable question rather than a property of the protocol.
pub fn erdos_renyi(n: usize, p: f64, rng: &mut StdRng) -> AdjacencyList {
    let mut adj = AdjacencyList::new();
    for i in 0..n {
        adj.insert(i, Vec::new());
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(rng);
    for pair in order.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        adj.get_mut(&a).unwrap().push(b);
        adj.get_mut(&b).unwrap().push(a);
    }

    for i in 0..n {
        for j in (i + 1)..n {
            if adj[&i].contains(&j) {
                continue;
            }
            if rng.gen_bool(p) {
                adj.get_mut(&i).unwrap().push(j);
                adj.get_mut(&j).unwrap().push(i);
            }
        }
    }

    adj
}

/// A single chain `0 -- 1 -- ... -- n-1`.
pub fn chain(n: usize) -> AdjacencyList {
    let mut adj = AdjacencyList::new();
    for i in 0..n {
        let mut neighbors = Vec::new();
        if i > 0 {
            neighbors.push(i - 1);
        }
        if i + 1 < n {
            neighbors.push(i + 1);
        }
        adj.insert(i, neighbors);
    }
    adj
}
