//! Quote-safe chunk boundary computation.
//!
//! Workers are handed disjoint, gap-free byte ranges of the mapped CSV.
//! A naive even split could land inside a quoted multi-line field, so we
//! first collect every "safe point" in the data region — a byte position
//! right after a newline that is not inside a quoted field, tracked via
//! running quote parity from the true start of the data region — and
//! then snap each even-split hint forward to the nearest safe point.
//! A single linear pass finds all safe points at once; this is no more
//! expensive than the field-extraction pass the scanner does anyway.

/// Byte positions, relative to the whole file, where it is safe to start
/// a new worker: each one is immediately after a newline that closes a
/// row (i.e. an even number of quotes preceded it since `data_start`).
/// Always includes `file_len` itself as the final safe point.
pub fn safe_points(data: &[u8], data_start: usize, file_len: usize) -> Vec<usize> {
    let mut points = Vec::new();
    let mut in_quotes = false;

    for (i, &b) in data[data_start..file_len].iter().enumerate() {
        let pos = data_start + i;
        match b {
            b'"' => in_quotes = !in_quotes,
            b'\n' if !in_quotes => points.push(pos + 1),
            _ => {}
        }
    }

    if points.last() != Some(&file_len) {
        points.push(file_len);
    }
    points
}

/// Compute `worker_count + 1` boundaries over `[data_start, file_len)`
/// such that `boundaries[0] == data_start`, `boundaries[workers] ==
/// file_len`, consecutive boundaries are non-decreasing, and every
/// intermediate boundary is a safe point.
pub fn quote_safe_boundaries(
    data: &[u8],
    data_start: usize,
    file_len: usize,
    workers: usize,
) -> Vec<usize> {
    let workers = workers.max(1);
    if file_len <= data_start || workers == 1 {
        return vec![data_start, file_len];
    }

    let points = safe_points(data, data_start, file_len);
    let span = file_len - data_start;

    let mut boundaries = Vec::with_capacity(workers + 1);
    boundaries.push(data_start);

    for w in 1..workers {
        let hint = (data_start + (span * w) / workers).min(file_len);
        let snapped = points
            .iter()
            .find(|&&p| p >= hint)
            .copied()
            .unwrap_or(file_len);
        boundaries.push(snapped.max(*boundaries.last().unwrap()));
    }

    boundaries.push(file_len);
    boundaries.dedup();
    if *boundaries.last().unwrap() != file_len {
        boundaries.push(file_len);
    }
    boundaries
}
