// SPDX-License-Identifier: CEPL-1.0
//! Uploads against a real device. Needs a Vulkan driver and a display
//! connection, so everything here is ignored by default:
//!
//! cargo test -p prism-render-vk --test gpu_upload -- --ignored
//!
//! One test function owns the event loop; winit allows a single loop per
//! process.

use ash::vk;
use prism_assets::{CubemapAsset, Rgba8Image};
use prism_render_vk::{
    ContextOptions, DeviceContext, GpuMesh, ImageLayoutState, UniformRing, Uploader,
};
use raw_window_handle::HasDisplayHandle;
use winit::event_loop::EventLoop;

fn headless_context() -> (DeviceContext, EventLoop<()>) {
    let mut builder = EventLoop::builder();
    #[cfg(all(unix, not(target_os = "macos")))]
    winit::platform::x11::EventLoopBuilderExtX11::with_any_thread(&mut builder, true);
    let event_loop = builder.build().expect("event loop");
    let display = event_loop
        .display_handle()
        .expect("display handle")
        .as_raw();
    let (ctx, surface) = DeviceContext::new(
        display,
        None,
        &ContextOptions {
            validation: false,
            pause_on_validation: false,
            require_discrete: false,
        },
    )
    .expect("device context");
    assert!(surface.is_none());
    (ctx, event_loop)
}

#[test]
#[ignore] // Requires GPU
fn uploads_round_trip_through_device_memory() {
    let (ctx, _event_loop) = headless_context();
    let uploader = Uploader::new(&ctx).expect("uploader");

    // buffer contents survive staging -> device-local -> readback
    let bytes: Vec<u8> = (0..=255u8).cycle().take(4096 + 3).collect();
    let buffer = uploader
        .upload_buffer(
            &ctx,
            &bytes,
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_SRC,
        )
        .expect("upload");
    let back = uploader.read_back(&ctx, &buffer).expect("read back");
    assert_eq!(&back[..bytes.len()], &bytes[..]);

    let patch = vec![0xAB; 64];
    uploader
        .update_buffer(&ctx, &buffer, &patch)
        .expect("update");
    let back = uploader.read_back(&ctx, &buffer).expect("read back");
    assert_eq!(&back[..64], &patch[..]);
    assert_eq!(&back[64..bytes.len()], &bytes[64..]);

    // without TRANSFER_SRC there is nothing to copy from
    let sealed = uploader
        .upload_buffer(&ctx, &bytes, vk::BufferUsageFlags::INDEX_BUFFER)
        .expect("upload");
    assert!(uploader.read_back(&ctx, &sealed).is_err());

    // meshes
    let sphere = prism_math::sphere(1.0, 16, 8);
    let mesh = GpuMesh::upload(&ctx, &uploader, &sphere).expect("mesh");
    assert_eq!(mesh.index_count as usize, sphere.indices.len());
    let empty = prism_math::GeometryData::default();
    assert!(GpuMesh::upload(&ctx, &uploader, &empty).is_err());

    // images end up sampled
    let cube = uploader
        .upload_cubemap(&ctx, &CubemapAsset::solid(4, [0.2, 0.4, 0.6, 1.0]))
        .expect("cubemap");
    assert_eq!(cube.array_layers, 6);
    assert_eq!(cube.layout(), ImageLayoutState::ShaderReadOnly);
    assert_ne!(cube.sampler, vk::Sampler::null());

    let albedo = Rgba8Image {
        width: 3,
        height: 2,
        pixels: vec![200; 3 * 2 * 4],
    };
    let tex = uploader.upload_texture_2d(&ctx, &albedo).expect("texture");
    assert_eq!(tex.layout(), ImageLayoutState::ShaderReadOnly);
    assert_eq!((tex.extent.width, tex.extent.height), (3, 2));

    let depth_format = ctx.depth_format().expect("depth format");
    let depth = uploader
        .create_depth(
            &ctx,
            vk::Extent2D {
                width: 64,
                height: 32,
            },
            depth_format,
        )
        .expect("depth");
    assert_eq!(depth.layout(), ImageLayoutState::DepthAttachment);

    // ring slots honour the device's dynamic offset alignment
    let mut ring = UniformRing::new(&ctx, 208, 3).expect("ring");
    let align = ctx.limits.min_uniform_buffer_offset_alignment as u32;
    for slot in 0..3 {
        assert_eq!(ring.offset(slot) % align, 0);
        ring.write(slot, &[slot as u32; 4]).expect("write");
    }
    assert!(ring.write(3, &[0u32; 4]).is_err());

    ctx.wait_idle();
}
