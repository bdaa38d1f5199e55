use std::ops::Range;

pub fn get_partition_range(
    num_threads: usize,
    thread_id: usize,
    num_spines: usize,
) -> Range<usize> {
    let min_partition_size = num_spines / num_threads;
    let remainder = num_spines % num_threads;

    if thread_id < remainder {
        let partition_size = min_partition_size + 1;
        let start = partition_size * thread_id;
        let end = start + partition_size;
        Range { start, end }
    } else {
        let start =
            (min_partition_size + 1) * remainder + min_partition_size * (thread_id - remainder);
        let end = start + min_partition_size;
        Range { start, end }
    }
}
