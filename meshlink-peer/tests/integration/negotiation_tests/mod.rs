mod test_offer_collision;
