use glam::{Mat4, Vec3, Vec4};
use radiance::types::{MaterialData, SubMesh};
use radiance_test::{cube, no_gpu_return, test_attr, NoImages, TestRunner};

#[test_attr]
pub async fn transparent_draws_follow_every_opaque_draw() -> anyhow::Result<()> {
    let mut runner = no_gpu_return!(TestRunner::builder().build().await);

    // Half the cube's faces see through, the other half are solid.
    let mut glass = cube(Vec4::ONE);
    glass.submeshes = vec![
        SubMesh {
            material_index: 1,
            index_count: 18,
            start_index: 0,
            base_vertex: 0,
            transparent: true,
        },
        SubMesh {
            material_index: 0,
            index_count: 18,
            start_index: 18,
            base_vertex: 0,
            transparent: false,
        },
    ];
    glass.materials.push(MaterialData {
        albedo: Vec4::new(0.2, 0.4, 0.8, 0.5),
        ..MaterialData::default()
    });

    runner.add_mesh("glass", &glass, Mat4::IDENTITY, &NoImages)?;
    runner.add_mesh(
        "solid",
        &cube(Vec4::ONE),
        Mat4::from_translation(Vec3::new(3.0, 0.0, 0.0)),
        &NoImages,
    )?;

    let order: Vec<_> = runner
        .scene()
        .draw_calls()
        .map(|(mesh, call)| (mesh, call.transparent))
        .collect();
    assert_eq!(order, [(0, false), (1, false), (0, true)]);

    runner.render_frame()?;

    Ok(())
}
