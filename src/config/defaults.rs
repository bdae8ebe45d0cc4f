pub(super) const OUTPUT_SUBDIR: &str = "out";

pub(super) fn default_dilation() -> usize {
    1
}

pub(super) fn default_roi_columns() -> Vec<String> {
    ["masks_mx", "masks_mean", "masks_bbox_mx", "masks_bbox_mean"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

pub(super) fn default_vessel_column() -> String {
    "boat_id".to_string()
}
