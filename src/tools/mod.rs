pub mod analyze_bid_detail_tool;
