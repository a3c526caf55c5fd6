mod test_common_validation;
mod test_eviction_loop;
