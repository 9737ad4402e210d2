pub(crate) mod debounce;
