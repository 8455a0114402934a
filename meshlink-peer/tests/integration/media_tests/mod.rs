mod test_screen_share;
mod test_start_and_toggle;
