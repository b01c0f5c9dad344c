mod test_revspec;
mod test_rewrite;
mod test_tree_filter;
