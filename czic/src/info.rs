use std::path::PathBuf;

use clap::Args;

#[derive(Args)]
/// Print directory and pyramid statistics of a document.
pub struct Info {
	input: PathBuf,
}

pub fn info(info: Info) {
	let mut repo = match czi::open_store(&info.input) {
		Ok(x) => x,
		Err(e) => {
			eprintln!("Error opening document: {}", e);
			return;
		},
	};

	let stats = repo.directory().statistics().clone();
	println!("sub-blocks:        {}", stats.sub_block_count);
	println!("bounding box:      {}", stats.bounding_box);
	println!("layer-0 box:       {}", stats.bounding_box_layer0);
	println!("dimension bounds:  {}", stats.dim_bounds);
	match (stats.min_m_index, stats.max_m_index) {
		(Some(min), Some(max)) => println!("m-index range:     {}..{}", min, max),
		_ => println!("m-index range:     none"),
	}

	if !stats.scene_bounding_boxes.is_empty() {
		println!("scenes:");
		for (scene, boxes) in &stats.scene_bounding_boxes {
			println!(
				"  S{}: {} (layer 0: {})",
				scene, boxes.bounding_box, boxes.bounding_box_layer0
			);
		}
	}

	println!("pyramid:");
	let pyramid = repo.directory_mut().pyramid_statistics();
	for (scene, catalogue) in &pyramid.scene_pyramid_statistics {
		if *scene == czi::NO_SCENE {
			println!("  (no scene)");
		} else {
			println!("  S{}", scene);
		}

		for layer in catalogue {
			if layer.layer_info.is_not_identified() {
				println!("    unidentified layer: {} sub-block(s)", layer.count);
			} else {
				println!(
					"    minification {}^{}: {} sub-block(s)",
					layer.layer_info.minification_factor,
					layer.layer_info.pyramid_layer_no,
					layer.count
				);
			}
		}
	}
}
