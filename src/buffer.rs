//! Line-limited batch buffer.

/// In-memory batch of lines split round-robin into a fixed number of partitions.
///
/// Line *i* of the batch lands in partition `i mod N`, so no partition ever holds more than
/// ⌈limit / N⌉ lines.
pub struct Batch {
    limit: usize,
    len: usize,
    partitions: Vec<Vec<String>>,
}

impl Batch {
    /// Creates an empty batch.
    ///
    /// # Arguments
    /// * `limit` - Maximum number of lines the batch holds
    /// * `partitions_number` - Number of partitions lines are distributed across
    pub fn new(limit: usize, partitions_number: usize) -> Self {
        let partitions_number = partitions_number.max(1);
        let partition_capacity = limit.min(1 << 20) / partitions_number + 1;

        Batch {
            limit,
            len: 0,
            partitions: (0..partitions_number)
                .map(|_| Vec::with_capacity(partition_capacity))
                .collect(),
        }
    }

    /// Adds a new line to the next partition in round-robin order.
    pub fn push(&mut self, line: String) {
        let idx = self.len % self.partitions.len();
        self.partitions[idx].push(line);
        self.len += 1;
    }

    /// Returns the number of lines held by the batch.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Checks if the batch reached the limit.
    pub fn is_full(&self) -> bool {
        self.len >= self.limit
    }

    pub fn partitions_mut(&mut self) -> &mut [Vec<String>] {
        &mut self.partitions
    }

    /// Empties every partition keeping the allocated capacity.
    pub fn clear(&mut self) {
        for partition in self.partitions.iter_mut() {
            partition.clear();
        }
        self.len = 0;
    }
}
