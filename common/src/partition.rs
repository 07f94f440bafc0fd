//! Key-to-partition routing for sync jobs published on a message queue
//!
//! Producers put the index of the wanted partition in the message key. Anything that does not
//! name an existing partition goes to the first one.

/// Picks the partition for a message with the given key.
pub fn balance(key: &[u8], partitions: &[usize]) -> usize {
    let Some(&first) = partitions.first() else {
        return 0;
    };
    std::str::from_utf8(key)
        .ok()
        .and_then(|key| key.trim().parse::<usize>().ok())
        .and_then(|index| partitions.get(index).copied())
        .unwrap_or(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_key_selects_partition() {
        assert_eq!(balance(b"2", &[10, 11, 12]), 12);
        assert_eq!(balance(b"0", &[10, 11, 12]), 10);
    }

    #[test]
    fn invalid_keys_fall_back_to_first() {
        let partitions = [7, 8, 9];
        assert_eq!(balance(b"3", &partitions), 7);
        assert_eq!(balance(b"-1", &partitions), 7);
        assert_eq!(balance(b"media-eu", &partitions), 7);
        assert_eq!(balance(b"", &partitions), 7);
        assert_eq!(balance(&[0xff, 0xfe], &partitions), 7);
    }

    #[test]
    fn no_partitions() {
        assert_eq!(balance(b"1", &[]), 0);
    }
}
